//! # Control Channel Module
//!
//! WebSocket client that listens to the experiment front end for phase and
//! session events.
//!
//! ## Threading
//! Runs on its own thread with its own Tokio runtime, like any other blocking
//! network client, so neither the acquisition loop nor the view ever wait on
//! the socket. Parsed events are handed over through a crossbeam channel and
//! applied by the acquisition worker on its next tick.
//!
//! ## Reconnection
//! A refused or dropped connection is logged and retried after
//! `reconnect_delay_secs`. Unparseable messages are logged and skipped.

use crate::config::{NetworkConfig, SessionConfig};
use crate::phase::{parse_envelope, ControlEvent};
use crossbeam_channel::Sender;
use futures_util::StreamExt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

// How often a blocked read or back-off wakes up to check for shutdown
const STOP_POLL: Duration = Duration::from_millis(100);

pub struct ControlListener {
    uri: String,
    start_event: String,
    reconnect_delay: Duration,
    events: Sender<ControlEvent>,
    should_stop: Arc<AtomicBool>,
}

/// Stops the listener thread when shut down or dropped
pub struct ControlHandle {
    should_stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Control listener thread panicked");
            }
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Delivery {
    Continue,
    ReceiverGone,
}

impl ControlListener {
    pub fn new(
        network: &NetworkConfig,
        session: &SessionConfig,
        events: Sender<ControlEvent>,
    ) -> Self {
        Self {
            uri: network.control_uri.clone(),
            start_event: session.start_event.clone(),
            reconnect_delay: network.reconnect_delay(),
            events,
            should_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawn(self) -> io::Result<ControlHandle> {
        let should_stop = self.should_stop.clone();
        let thread = thread::Builder::new()
            .name("control".to_string())
            .spawn(move || self.run())?;
        Ok(ControlHandle {
            should_stop,
            thread: Some(thread),
        })
    }

    fn run(self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Control channel disabled, could not start runtime: {}", e);
                return;
            }
        };
        rt.block_on(self.listen());
        log::info!("Control listener stopped");
    }

    fn stopped(&self) -> bool {
        self.should_stop.load(Ordering::Relaxed)
    }

    async fn listen(&self) {
        while !self.stopped() {
            log::info!("Connecting to control channel at {}", self.uri);
            let connect = tokio_tungstenite::connect_async(self.uri.as_str());
            match tokio::time::timeout(self.reconnect_delay.max(STOP_POLL), connect).await {
                Ok(Ok((mut stream, _response))) => {
                    log::info!("Control channel connected");
                    if let Delivery::ReceiverGone = self.read_messages(&mut stream).await {
                        return;
                    }
                    log::warn!("Control channel disconnected");
                }
                Ok(Err(e)) => log::warn!("Control channel unavailable: {}", e),
                Err(_) => log::warn!("Control channel connection timed out"),
            }
            self.back_off().await;
        }
    }

    async fn read_messages(
        &self,
        stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> Delivery {
        while !self.stopped() {
            let message = match tokio::time::timeout(STOP_POLL, stream.next()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    log::warn!("Control channel read failed: {}", e);
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    if let Delivery::ReceiverGone = self.deliver(&text) {
                        return Delivery::ReceiverGone;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Delivery::Continue
    }

    fn deliver(&self, text: &str) -> Delivery {
        match parse_envelope(text, &self.start_event) {
            Ok(event) => {
                log::debug!("Control event: {:?}", event);
                if self.events.send(event).is_err() {
                    log::info!("Acquisition worker gone, stopping control listener");
                    return Delivery::ReceiverGone;
                }
            }
            Err(e) => log::warn!("Ignoring control message: {}", e),
        }
        Delivery::Continue
    }

    async fn back_off(&self) {
        let mut waited = Duration::ZERO;
        while waited < self.reconnect_delay && !self.stopped() {
            tokio::time::sleep(STOP_POLL).await;
            waited += STOP_POLL;
        }
    }
}
