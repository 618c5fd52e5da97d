//! # Datagram Transport Module
//!
//! Non-blocking UDP receiver for sensor datagrams.
//!
//! ## Contract
//! - `UdpReceiver::bind` binds once; failure is fatal at startup.
//! - `try_recv` never blocks: it yields one payload, `None` when nothing is
//!   queued, or `TransportError::Closed` once the receiver has been closed.
//! - `CloseHandle` can be sent to another thread; closing is idempotent and
//!   the owning worker observes it on its next `try_recv`.

use crate::error::TransportError;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Source of raw datagram payloads for the ingest loop
pub trait DatagramSource {
    /// Copy the next queued payload into `buf`, returning its length
    fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError>;
}

pub struct UdpReceiver {
    socket: Option<UdpSocket>,
    closed: Arc<AtomicBool>,
}

/// Cross-thread handle that shuts the receiver down
#[derive(Debug, Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
}

impl CloseHandle {
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::info!("UDP receiver close requested");
        }
    }
}

impl UdpReceiver {
    pub fn bind(addr: &str) -> Result<Self, TransportError> {
        let bind_err = |source: io::Error| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let socket = UdpSocket::bind(addr).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        log::info!("Listening for sensor datagrams on {}", addr);

        Ok(Self {
            socket: Some(socket),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        match &self.socket {
            Some(socket) => socket.local_addr().map_err(TransportError::Io),
            None => Err(TransportError::Closed),
        }
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            closed: self.closed.clone(),
        }
    }

    /// Close from the owning thread. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.socket.take().is_some() {
            log::info!("UDP socket closed");
        }
    }
}

impl DatagramSource for UdpReceiver {
    fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            self.close();
            return Err(TransportError::Closed);
        }

        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        match socket.recv_from(buf) {
            Ok((len, _from)) => Ok(Some(len)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // Windows reports ICMP port-unreachable for earlier sends as a receive error
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}
