//! # Live Channel State Module
//!
//! Rolling display buffers shared between the ingest worker (the only writer)
//! and the live view (which only ever takes snapshots).
//!
//! ## Key Types
//! - `Channels`: every live series plus the latest HRV result and counters
//! - `SharedChannels`: cloneable handle around `Arc<Mutex<Channels>>`
//! - `ChannelSnapshot`: plain copy handed to the renderer each frame
//!
//! The view never holds the lock while drawing, so a slow frame cannot stall
//! ingest for longer than one copy.

use crate::config::BufferConfig;
use crate::hrv::HrvResult;
use crate::packet::Reading;
use crate::phase::Phase;
use crate::timeseries::RollingBuffer;
use std::sync::{Arc, Mutex};

/// Running totals shown in the sidebar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub malformed: u64,
    pub artifacts: u64,
    pub logged: u64,
}

pub struct Channels {
    pub gsr: RollingBuffer<f64>,
    pub eda: RollingBuffer<f64>,
    /// Raw inter-beat intervals, artifacts included
    pub ibi: RollingBuffer<f64>,
    pub gyro_x: RollingBuffer<f64>,
    pub gyro_y: RollingBuffer<f64>,
    pub gyro_z: RollingBuffer<f64>,
    pub rmssd: RollingBuffer<f64>,
    pub hf_nu: RollingBuffer<f64>,
    pub latest_hrv: Option<HrvResult>,
    pub phase: Phase,
    pub participant: Option<String>,
    pub stats: IngestStats,
}

impl Channels {
    pub fn new(buffers: &BufferConfig) -> Self {
        let history = buffers.history_length;
        let metrics = buffers.metric_history_length;
        Self {
            gsr: RollingBuffer::new(history),
            eda: RollingBuffer::new(history),
            ibi: RollingBuffer::new(history),
            gyro_x: RollingBuffer::new(history),
            gyro_y: RollingBuffer::new(history),
            gyro_z: RollingBuffer::new(history),
            rmssd: RollingBuffer::new(metrics),
            hf_nu: RollingBuffer::new(metrics),
            latest_hrv: None,
            phase: Phase::default(),
            participant: None,
            stats: IngestStats::default(),
        }
    }

    /// Route a decoded reading to its display series
    pub fn push_reading(&mut self, reading: &Reading) {
        match *reading {
            Reading::Gsr(value) => self.gsr.push(value),
            Reading::EdaIbi { eda, ibi_ms } => {
                self.eda.push(eda);
                self.ibi.push(f64::from(ibi_ms));
            }
            Reading::Gyro { x, y, z } => {
                self.gyro_x.push(x);
                self.gyro_y.push(y);
                self.gyro_z.push(z);
            }
        }
    }

    pub fn push_hrv(&mut self, result: HrvResult) {
        self.rmssd.push(result.rmssd_ms);
        self.hf_nu.push(result.hf_nu);
        self.latest_hrv = Some(result);
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            gsr: self.gsr.snapshot(),
            eda: self.eda.snapshot(),
            ibi: self.ibi.snapshot(),
            gyro_x: self.gyro_x.snapshot(),
            gyro_y: self.gyro_y.snapshot(),
            gyro_z: self.gyro_z.snapshot(),
            rmssd: self.rmssd.snapshot(),
            hf_nu: self.hf_nu.snapshot(),
            latest_hrv: self.latest_hrv.clone(),
            phase: self.phase.clone(),
            participant: self.participant.clone(),
            stats: self.stats,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelSnapshot {
    pub gsr: Vec<f64>,
    pub eda: Vec<f64>,
    pub ibi: Vec<f64>,
    pub gyro_x: Vec<f64>,
    pub gyro_y: Vec<f64>,
    pub gyro_z: Vec<f64>,
    pub rmssd: Vec<f64>,
    pub hf_nu: Vec<f64>,
    pub latest_hrv: Option<HrvResult>,
    pub phase: Phase,
    pub participant: Option<String>,
    pub stats: IngestStats,
}

#[derive(Clone)]
pub struct SharedChannels {
    inner: Arc<Mutex<Channels>>,
}

impl SharedChannels {
    pub fn new(buffers: &BufferConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Channels::new(buffers))),
        }
    }

    /// Run `f` with exclusive access. A poisoned lock is recovered since the
    /// buffers are always left in a consistent state between pushes.
    pub fn update<R>(&self, f: impl FnOnce(&mut Channels) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.update(|channels| channels.snapshot())
    }
}
