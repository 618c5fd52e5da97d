//! # Session Recording Module
//!
//! Append-only CSV log of every processed sample, stamped with the phase that
//! was active when it was written.
//!
//! ## File Layout
//! ```text
//! bio_data/
//! ├── session_20250626_101500.csv   (before any participant session starts)
//! └── Ana L_pez__bio.csv            (one file per participant session)
//! ```
//!
//! ## Columns
//! `timestamp,datetime,<schema columns>,phase` where `timestamp` is Unix
//! seconds and `datetime` the local time of day. For the EDA + IBI schema the
//! `ibi_clean` column is empty when the beat was rejected as an artifact.
//!
//! ## Durability
//! Each row is flushed as soon as it is written, so an abnormal exit loses at
//! most the row being written. Closing is idempotent and also happens on drop.

use crate::error::RecorderError;
use crate::packet::{Reading, Sample, SensorSchema};
use crate::phase::Phase;
use std::fs::{self, File};
use std::path::PathBuf;

/// One row of the session log
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub sample: &'a Sample,
    /// Cleaned interval, `None` for artifacts and for schemas without one
    pub cleaned: Option<f64>,
    pub phase: &'a Phase,
}

impl LogRecord<'_> {
    fn fields(&self) -> Vec<String> {
        let received = &self.sample.received;
        let mut fields = vec![format!("{:.6}", received.unix_seconds()), received.time_of_day()];
        match self.sample.reading {
            Reading::Gsr(value) => fields.push(value.to_string()),
            Reading::EdaIbi { eda, ibi_ms } => {
                fields.push(eda.to_string());
                fields.push(ibi_ms.to_string());
                fields.push(self.cleaned.map(|v| v.to_string()).unwrap_or_default());
            }
            Reading::Gyro { x, y, z } => {
                fields.push(x.to_string());
                fields.push(y.to_string());
                fields.push(z.to_string());
            }
        }
        fields.push(self.phase.to_string());
        fields
    }
}

/// Header row for a schema
pub fn header(schema: SensorSchema) -> Vec<&'static str> {
    let mut columns = vec!["timestamp", "datetime"];
    columns.extend_from_slice(schema.value_columns());
    columns.push("phase");
    columns
}

/// File name used for a participant's session
pub fn participant_file_name(participant_id: &str) -> String {
    format!("{}_bio.csv", participant_id)
}

struct ActiveLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

/// Owns the session log file for the lifetime of a recording
pub struct SessionLogger {
    schema: SensorSchema,
    log_dir: PathBuf,
    active: Option<ActiveLog>,
    /// Samples seen while no file was open, since the last open
    dropped: u64,
}

impl SessionLogger {
    pub fn new(schema: SensorSchema, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema,
            log_dir: log_dir.into(),
            active: None,
            dropped: 0,
        }
    }

    /// Start `<log_dir>/<participant_id>_bio.csv`, closing any current file
    pub fn open_participant(&mut self, participant_id: &str) -> Result<PathBuf, RecorderError> {
        let path = self.log_dir.join(participant_file_name(participant_id));
        self.open(path)
    }

    /// Start a recording named after the current local time
    pub fn open_timestamped(&mut self) -> Result<PathBuf, RecorderError> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self.log_dir.join(format!("session_{}.csv", timestamp));
        self.open(path)
    }

    fn open(&mut self, path: PathBuf) -> Result<PathBuf, RecorderError> {
        // a failed flush of the old file must not keep the new one from opening
        if let Err(e) = self.close() {
            log::error!("{}", e);
        }

        fs::create_dir_all(&self.log_dir).map_err(|source| RecorderError::CreateDir {
            path: self.log_dir.clone(),
            source,
        })?;
        let file = File::create(&path).map_err(|source| RecorderError::CreateFile {
            path: path.clone(),
            source,
        })?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(header(self.schema))?;
        writer.flush().map_err(RecorderError::Flush)?;

        log::info!("Recording session log to {}", path.display());
        self.active = Some(ActiveLog {
            path: path.clone(),
            writer,
            rows: 0,
        });
        self.dropped = 0;
        Ok(path)
    }

    /// Write and flush one row. Returns `false` when no file is open.
    pub fn append(&mut self, record: &LogRecord<'_>) -> Result<bool, RecorderError> {
        let Some(active) = self.active.as_mut() else {
            if self.dropped == 0 {
                log::warn!("No session log open; samples are not being recorded");
            }
            self.dropped += 1;
            return Ok(false);
        };
        active.writer.write_record(record.fields())?;
        active.writer.flush().map_err(RecorderError::Flush)?;
        active.rows += 1;
        Ok(true)
    }

    /// Flush and close the current file. Repeated calls do nothing.
    pub fn close(&mut self) -> Result<(), RecorderError> {
        if let Some(mut active) = self.active.take() {
            active.writer.flush().map_err(RecorderError::Flush)?;
            log::info!(
                "Closed session log {} ({} rows)",
                active.path.display(),
                active.rows
            );
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub fn current_path(&self) -> Option<&std::path::Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Data rows written to the current file
    #[cfg(test)]
    pub fn rows_written(&self) -> u64 {
        self.active.as_ref().map(|a| a.rows).unwrap_or(0)
    }

    #[cfg(test)]
    fn rows_dropped(&self) -> u64 {
        self.dropped
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("{}", e);
        }
    }
}
