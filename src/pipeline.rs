//! # Sample Pipeline Module
//!
//! Everything that happens to a datagram after it leaves the socket, owned by
//! a single thread so the filter, the analysis window, the current phase and
//! the log file never need their own locks.
//!
//! ## Per-sample order
//! 1. Decode against the configured schema (malformed payloads are counted and dropped)
//! 2. For EDA + IBI, run the artifact filter; accepted beats join the analysis window
//! 3. Append one log row stamped with the current phase
//! 4. Push the reading into the shared display buffers
//!
//! Control events are drained before datagrams on every tick, so a phase
//! change that arrived first is reflected in every row written after it.

use crate::artifact::ArtifactFilter;
use crate::channels::SharedChannels;
use crate::config::Config;
use crate::error::{RecorderError, TransportError};
use crate::hrv::{AnalysisOutcome, AnalysisWindow, HrvAnalyzer};
use crate::packet::{decode, SensorSchema, Timestamp};
use crate::phase::{ControlEvent, Phase, PhaseController, SessionRequest};
use crate::recorder::{LogRecord, SessionLogger};
use crate::transport::DatagramSource;
use crossbeam_channel::{Receiver, TryRecvError};
use std::time::Instant;

pub struct Pipeline {
    schema: SensorSchema,
    filter: ArtifactFilter,
    window: AnalysisWindow,
    analyzer: HrvAnalyzer,
    controller: PhaseController,
    logger: SessionLogger,
    channels: SharedChannels,
    recv_buf: Vec<u8>,
}

impl Pipeline {
    /// Build the pipeline and, if configured, open a timestamped log so data
    /// arriving before the first session is still recorded.
    pub fn new(
        config: &Config,
        channels: SharedChannels,
        started: Instant,
    ) -> Result<Self, RecorderError> {
        let mut logger = SessionLogger::new(config.sensor.schema, &config.session.log_dir);
        if config.session.log_before_session {
            logger.open_timestamped()?;
        }

        let controller = PhaseController::new(Phase::new(config.session.default_phase.clone()));
        channels.update(|c| c.phase = controller.current().clone());

        Ok(Self {
            schema: config.sensor.schema,
            filter: ArtifactFilter::new(
                config.filter.ibi_change_threshold,
                config.filter.seed_ibi_ms,
            ),
            window: AnalysisWindow::new(config.analysis.window_capacity()),
            analyzer: HrvAnalyzer::new(
                config.analysis.interval(),
                config.analysis.min_samples,
                started,
            ),
            controller,
            logger,
            channels,
            recv_buf: vec![0u8; config.network.max_datagram_bytes.max(1)],
        })
    }

    #[cfg(test)]
    pub fn logger(&self) -> &SessionLogger {
        &self.logger
    }

    #[cfg(test)]
    pub fn analysis_window(&self) -> &AnalysisWindow {
        &self.window
    }

    /// Decode, filter, log and publish one payload
    pub fn process_payload(&mut self, payload: &[u8], received: Timestamp) {
        let sample = match decode(self.schema, payload, received) {
            Ok(sample) => sample,
            Err(e) => {
                log::debug!("Dropping malformed datagram ({} bytes): {}", payload.len(), e);
                self.channels.update(|c| {
                    c.stats.received += 1;
                    c.stats.malformed += 1;
                });
                return;
            }
        };

        let classification = sample.reading.ibi_ms().map(|ibi| {
            let result = self.filter.apply(f64::from(ibi));
            if let Some(clean) = result.cleaned() {
                self.window.push(clean);
            }
            result
        });
        let cleaned = classification.and_then(|c| c.cleaned());
        let is_artifact = classification.map(|c| c.is_artifact()).unwrap_or(false);
        if is_artifact {
            log::debug!(
                "IBI artifact rejected: {} (reference {} ms)",
                sample.reading.to_payload(),
                self.filter.last_accepted()
            );
        }

        let record = LogRecord {
            sample: &sample,
            cleaned,
            phase: self.controller.current(),
        };
        let logged = match self.logger.append(&record) {
            Ok(written) => written,
            Err(e) => {
                log::error!("{}", e);
                false
            }
        };

        self.channels.update(|c| {
            c.push_reading(&sample.reading);
            c.stats.received += 1;
            if is_artifact {
                c.stats.artifacts += 1;
            }
            if logged {
                c.stats.logged += 1;
            }
        });
    }

    /// Apply one control event; a session start rotates the log file
    pub fn apply_control(&mut self, event: ControlEvent) {
        if let Some(SessionRequest::Open { participant_id }) = self.controller.apply(event) {
            if let Err(e) = self.logger.open_participant(&participant_id) {
                log::error!("Could not start log for '{}': {}", participant_id, e);
            }
        }

        let phase = self.controller.current().clone();
        let participant = self.controller.participant().map(String::from);
        self.channels.update(|c| {
            c.phase = phase;
            c.participant = participant;
        });
    }

    /// Apply every queued control event, returning how many were applied
    pub fn drain_control(&mut self, events: &Receiver<ControlEvent>) -> usize {
        let mut applied = 0;
        loop {
            match events.try_recv() {
                Ok(event) => {
                    self.apply_control(event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Process up to `max` queued datagrams without blocking
    pub fn drain_datagrams<S: DatagramSource>(
        &mut self,
        source: &mut S,
        max: usize,
    ) -> Result<usize, TransportError> {
        let mut processed = 0;
        while processed < max {
            // the buffer is moved out so `process_payload` can borrow self mutably
            let mut buf = std::mem::take(&mut self.recv_buf);
            let received = source.try_recv(&mut buf).map(|len| {
                if let Some(len) = len {
                    self.process_payload(&buf[..len], Timestamp::now());
                }
                len.is_some()
            });
            self.recv_buf = buf;
            if !received? {
                break;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Run the analysis cadence and publish new metrics
    pub fn poll_analysis(&mut self, now: Timestamp) -> AnalysisOutcome {
        let outcome = self.analyzer.poll(now, &self.window);
        if let AnalysisOutcome::Computed(result) = &outcome {
            let result = result.clone();
            self.channels.update(|c| c.push_hrv(result));
        }
        outcome
    }

    /// Flush and close the log
    pub fn finish(&mut self) {
        if let Err(e) = self.logger.close() {
            log::error!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::parse_envelope;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    struct ScriptedSource {
        queued: VecDeque<Vec<u8>>,
        closed: bool,
    }

    impl ScriptedSource {
        fn new(payloads: &[&str]) -> Self {
            Self {
                queued: payloads.iter().map(|p| p.as_bytes().to_vec()).collect(),
                closed: false,
            }
        }
    }

    impl DatagramSource for ScriptedSource {
        fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
            match self.queued.pop_front() {
                Some(payload) => {
                    buf[..payload.len()].copy_from_slice(&payload);
                    Ok(Some(payload.len()))
                }
                None if self.closed => Err(TransportError::Closed),
                None => Ok(None),
            }
        }
    }

    fn test_config(log_dir: &Path, schema: SensorSchema) -> Config {
        let mut config = Config::default();
        config.sensor.schema = schema;
        config.session.log_dir = log_dir.to_path_buf();
        config
    }

    fn pipeline_for(
        log_dir: &Path,
        schema: SensorSchema,
        channels: &SharedChannels,
        started: Instant,
    ) -> Pipeline {
        Pipeline::new(&test_config(log_dir, schema), channels.clone(), started).unwrap()
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    #[test]
    fn test_gsr_sample_reaches_buffer_and_log() {
        let dir = tempdir().unwrap();
        let channels = SharedChannels::new(&Default::default());
        let mut pipeline = pipeline_for(dir.path(), SensorSchema::Gsr, &channels, Instant::now());

        pipeline.process_payload(b"GSR:512.0", Timestamp::now());

        let snapshot = channels.snapshot();
        assert_eq!(snapshot.gsr, vec![512.0]);
        assert_eq!(snapshot.stats.logged, 1);

        let path = pipeline.logger().current_path().unwrap().to_path_buf();
        let rows = read_rows(&path);
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][2..], ["512", "idle"]);
    }

    #[test]
    fn test_artifact_then_accepted_beat() {
        let dir = tempdir().unwrap();
        let channels = SharedChannels::new(&Default::default());
        let mut pipeline =
            pipeline_for(dir.path(), SensorSchema::EdaIbi, &channels, Instant::now());

        pipeline.process_payload(b"300.0,1000", Timestamp::now());
        assert!(pipeline.analysis_window().is_empty());
        pipeline.process_payload(b"300.0,800", Timestamp::now());
        assert_eq!(pipeline.analysis_window().values(), vec![800.0]);

        let snapshot = channels.snapshot();
        assert_eq!(snapshot.eda, vec![300.0, 300.0]);
        assert_eq!(snapshot.ibi, vec![1000.0, 800.0]);
        assert_eq!(snapshot.stats.artifacts, 1);

        let rows = read_rows(pipeline.logger().current_path().unwrap());
        assert_eq!(&rows[0][2..5], ["300", "1000", ""]);
        assert_eq!(&rows[1][2..5], ["300", "800", "800"]);
    }

    #[test]
    fn test_malformed_payload_is_counted_and_dropped() {
        let dir = tempdir().unwrap();
        let channels = SharedChannels::new(&Default::default());
        let mut pipeline = pipeline_for(dir.path(), SensorSchema::Gsr, &channels, Instant::now());

        pipeline.process_payload(b"hello", Timestamp::now());
        pipeline.process_payload(b"GSR:abc", Timestamp::now());

        let snapshot = channels.snapshot();
        assert!(snapshot.gsr.is_empty());
        assert_eq!(snapshot.stats.malformed, 2);
        assert_eq!(snapshot.stats.logged, 0);
        assert_eq!(pipeline.logger().rows_written(), 0);
    }

    #[test]
    fn test_phase_change_applies_to_following_rows() {
        let dir = tempdir().unwrap();
        let channels = SharedChannels::new(&Default::default());
        let mut pipeline = pipeline_for(dir.path(), SensorSchema::Gsr, &channels, Instant::now());
        let (tx, rx) = crossbeam_channel::unbounded();

        let start = parse_envelope(
            r#"{"event":"INICIO_BASELINE","details":{"participantId":"Ana López!"}}"#,
            "INICIO_BASELINE",
        )
        .unwrap();
        tx.send(start).unwrap();
        assert_eq!(pipeline.drain_control(&rx), 1);
        pipeline.process_payload(b"GSR:1.0", Timestamp::now());

        tx.send(ControlEvent::PhaseChange(Phase::new("INICIO_STROOP"))).unwrap();
        pipeline.drain_control(&rx);
        pipeline.process_payload(b"GSR:2.0", Timestamp::now());

        let path = pipeline.logger().current_path().unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("Ana L_pez__bio.csv"));
        let rows = read_rows(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][3], "INICIO_BASELINE");
        assert_eq!(rows[1][3], "INICIO_STROOP");

        let snapshot = channels.snapshot();
        assert_eq!(snapshot.phase.as_str(), "INICIO_STROOP");
        assert_eq!(snapshot.participant.as_deref(), Some("Ana L_pez_"));
    }

    #[test]
    fn test_no_log_before_session_when_disabled() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path(), SensorSchema::Gsr);
        config.session.log_before_session = false;
        let channels = SharedChannels::new(&Default::default());
        let mut pipeline = Pipeline::new(&config, channels.clone(), Instant::now()).unwrap();

        pipeline.process_payload(b"GSR:3.0", Timestamp::now());
        assert!(!pipeline.logger().is_open());
        assert_eq!(channels.snapshot().gsr, vec![3.0]);
    }

    #[test]
    fn test_drain_datagrams_respects_limit_and_close() {
        let dir = tempdir().unwrap();
        let channels = SharedChannels::new(&Default::default());
        let mut pipeline = pipeline_for(dir.path(), SensorSchema::Gsr, &channels, Instant::now());
        let mut source = ScriptedSource::new(&["GSR:1", "GSR:2", "GSR:3"]);

        assert_eq!(pipeline.drain_datagrams(&mut source, 2).unwrap(), 2);
        assert_eq!(pipeline.drain_datagrams(&mut source, 2).unwrap(), 1);
        assert_eq!(pipeline.drain_datagrams(&mut source, 2).unwrap(), 0);

        source.closed = true;
        assert!(matches!(
            pipeline.drain_datagrams(&mut source, 2),
            Err(TransportError::Closed)
        ));
        assert_eq!(channels.snapshot().gsr, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_analysis_publishes_metrics() {
        let dir = tempdir().unwrap();
        let started = Instant::now();
        let channels = SharedChannels::new(&Default::default());
        let mut pipeline = pipeline_for(dir.path(), SensorSchema::EdaIbi, &channels, started);

        for i in 0..60 {
            let ibi = if i % 2 == 0 { 780 } else { 820 };
            let payload = format!("300.0,{}", ibi);
            pipeline.process_payload(payload.as_bytes(), Timestamp::now());
        }

        let now = Timestamp {
            mono: started + Duration::from_secs(31),
            wall: chrono::Local::now(),
        };
        assert!(matches!(pipeline.poll_analysis(now), AnalysisOutcome::Computed(_)));

        let snapshot = channels.snapshot();
        assert_eq!(snapshot.rmssd.len(), 1);
        assert!((snapshot.rmssd[0] - 40.0).abs() < 1e-9);
        assert!(snapshot.latest_hrv.is_some());
    }
}
