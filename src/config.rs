//! # Configuration Management Module
//!
//! Persistent acquisition settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Sections
//! - `network`: UDP listen address and control channel endpoint
//! - `sensor`: which payload schema this deployment receives
//! - `filter`: inter-beat interval artifact rejection
//! - `analysis`: HRV window size and cadence
//! - `buffers`: live view history lengths
//! - `timing`: ingest tick and render refresh periods
//! - `session`: session log location and start-of-session event
//! - `chart`: offline debrief chart options
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/ataraxia-monitor/config.toml
//! - Linux: ~/.config/ataraxia-monitor/config.toml
//! - Windows: %APPDATA%\ataraxia-monitor\config.toml
//!
//! Every field has a default, so a partial file only overrides what it names.

use crate::error::ConfigError;
use crate::packet::SensorSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub sensor: SensorConfig,
    pub filter: FilterConfig,
    pub analysis: AnalysisConfig,
    pub buffers: BufferConfig,
    pub timing: TimingConfig,
    pub session: SessionConfig,
    pub chart: ChartConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_datagram_bytes: usize,
    pub enable_control_channel: bool,
    pub control_uri: String,
    pub reconnect_delay_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12345,
            max_datagram_bytes: 1024,
            enable_control_channel: true,
            control_uri: "ws://localhost:3000".to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub schema: SensorSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Relative IBI change above which a beat is treated as an artifact
    pub ibi_change_threshold: f64,
    /// Reference interval the first beat is compared against (ms)
    pub seed_ibi_ms: f64,
}

impl FilterConfig {
    /// A non-positive seed or threshold would classify every beat as an artifact
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.seed_ibi_ms.is_finite() && self.seed_ibi_ms > 0.0) {
            return Err(ConfigError::Invalid {
                field: "filter.seed_ibi_ms",
                reason: "must be a positive number of milliseconds",
            });
        }
        if !(self.ibi_change_threshold.is_finite() && self.ibi_change_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                field: "filter.ibi_change_threshold",
                reason: "must be a positive fraction",
            });
        }
        Ok(())
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ibi_change_threshold: 0.25,
            seed_ibi_ms: 750.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub window_seconds: u64,
    pub assumed_heart_rate_bpm: u64,
    pub interval_secs: u64,
    /// Analysis runs only when the window holds more than this many intervals
    pub min_samples: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_seconds: 180,
            assumed_heart_rate_bpm: 75,
            interval_secs: 30,
            min_samples: 50,
        }
    }
}

impl AnalysisConfig {
    /// Number of intervals that cover `window_seconds` at the assumed heart rate
    pub fn window_capacity(&self) -> usize {
        ((self.window_seconds * self.assumed_heart_rate_bpm) / 60).max(1) as usize
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub history_length: usize,
    pub metric_history_length: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            history_length: 300,
            metric_history_length: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_millis: u64,
    pub render_interval_millis: u64,
    pub max_datagrams_per_tick: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1,
            render_interval_millis: 33,
            max_datagrams_per_tick: 256,
        }
    }
}

impl TimingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_millis.max(1))
    }

    /// At least one receive per tick, so a closed receiver is always noticed
    pub fn max_datagrams_per_tick(&self) -> usize {
        self.max_datagrams_per_tick.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub log_dir: PathBuf,
    /// Control event that opens a new participant log
    pub start_event: String,
    /// Record to a timestamped file until the first participant session starts
    pub log_before_session: bool,
    pub default_phase: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("bio_data"),
            start_event: "INICIO_BASELINE".to_string(),
            log_before_session: true,
            default_phase: "idle".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub output_dir: PathBuf,
    pub moving_average_window: usize,
    /// Negate the smoothed signal so that higher means more activation
    pub invert_signal: bool,
    pub signal_column: Option<String>,
    /// TrueType font for titles and legends; common system fonts are tried when unset
    pub font_path: Option<PathBuf>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("feedback_images"),
            moving_average_window: 20,
            invert_signal: true,
            signal_column: None,
            font_path: None,
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ataraxia-monitor")
            .join("config.toml")
    }

    /// Load config from the platform location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                config.filter.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                log::info!("Created default config at {}", path.display());
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}
