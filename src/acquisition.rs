//! # Acquisition Worker Module
//!
//! Dedicated thread that owns the UDP receiver and the sample pipeline.
//!
//! Every tick it applies queued control events, drains up to
//! `max_datagrams_per_tick` datagrams, gives the HRV analyzer a chance to run
//! and then sleeps for the tick period. Closing the receiver through the
//! handle ends the loop on the next tick, after which the session log is
//! flushed and closed.

use crate::config::TimingConfig;
use crate::error::TransportError;
use crate::packet::Timestamp;
use crate::phase::ControlEvent;
use crate::pipeline::Pipeline;
use crate::transport::{CloseHandle, DatagramSource, UdpReceiver};
use crossbeam_channel::Receiver;
use std::io;
use std::thread::{self, JoinHandle};

pub struct AcquisitionHandle {
    close: CloseHandle,
    thread: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// Stop the worker and wait for the log to be closed
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.close.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Acquisition thread panicked");
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the acquisition thread
pub fn spawn(
    receiver: UdpReceiver,
    pipeline: Pipeline,
    control: Receiver<ControlEvent>,
    timing: TimingConfig,
) -> io::Result<AcquisitionHandle> {
    let close = receiver.close_handle();
    let thread = thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || run(receiver, pipeline, control, timing))?;

    Ok(AcquisitionHandle {
        close,
        thread: Some(thread),
    })
}

/// Tick loop; returns once the source reports it is closed
pub fn run<S: DatagramSource>(
    mut source: S,
    mut pipeline: Pipeline,
    control: Receiver<ControlEvent>,
    timing: TimingConfig,
) {
    log::info!("Acquisition started");
    loop {
        pipeline.drain_control(&control);

        match pipeline.drain_datagrams(&mut source, timing.max_datagrams_per_tick()) {
            Ok(_) => {}
            Err(TransportError::Closed) => break,
            Err(e) => log::warn!("{}", e),
        }

        pipeline.poll_analysis(Timestamp::now());
        thread::sleep(timing.tick());
    }
    pipeline.finish();
    log::info!("Acquisition stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SharedChannels;
    use crate::config::Config;
    use crate::packet::SensorSchema;
    use crate::phase::Phase;
    use std::net::UdpSocket;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn gsr_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.sensor.schema = SensorSchema::Gsr;
        config.session.log_dir = dir.to_path_buf();
        config
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_worker_ingests_and_shuts_down() {
        let dir = tempdir().unwrap();
        let config = gsr_config(dir.path());
        let channels = SharedChannels::new(&config.buffers);
        let pipeline = Pipeline::new(&config, channels.clone(), Instant::now()).unwrap();
        let log_path = pipeline.logger().current_path().unwrap().to_path_buf();

        let receiver = UdpReceiver::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();
        let (_tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn(receiver, pipeline, rx, config.timing.clone()).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"GSR:512.0", addr).unwrap();
        assert!(wait_for(|| channels.snapshot().gsr == vec![512.0]));

        handle.shutdown();
        let contents = std::fs::read_to_string(log_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().nth(1).unwrap().contains("512"));
    }

    #[test]
    fn test_control_events_reach_worker() {
        let dir = tempdir().unwrap();
        let config = gsr_config(dir.path());
        let channels = SharedChannels::new(&config.buffers);
        let pipeline = Pipeline::new(&config, channels.clone(), Instant::now()).unwrap();

        let receiver = UdpReceiver::bind("127.0.0.1:0").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn(receiver, pipeline, rx, config.timing.clone()).unwrap();

        tx.send(ControlEvent::PhaseChange(Phase::new("FIN_SESION"))).unwrap();
        assert!(wait_for(|| channels.snapshot().phase.as_str() == "FIN_SESION"));
        handle.shutdown();
    }

    #[test]
    fn test_shutdown_with_zero_drain_limit() {
        let dir = tempdir().unwrap();
        let mut config = gsr_config(dir.path());
        config.timing.max_datagrams_per_tick = 0;
        let channels = SharedChannels::new(&config.buffers);
        let pipeline = Pipeline::new(&config, channels, Instant::now()).unwrap();

        let receiver = UdpReceiver::bind("127.0.0.1:0").unwrap();
        let (_tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn(receiver, pipeline, rx, config.timing.clone()).unwrap();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            handle.shutdown();
            let _ = done_tx.send(());
        });
        assert!(
            done_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
            "worker still running after close"
        );
    }
}
