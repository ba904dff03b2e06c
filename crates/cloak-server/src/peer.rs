//! Per-connection plumbing.
//!
//! The registry owns a [`PeerHandle`] for every connection; the connection
//! task owns the matching [`PeerChannels`]. Writes through the handle are
//! queued without blocking and drained by the task onto the socket. Closing
//! the handle tells the task to drop the socket.

use std::io;

use bytes::Bytes;
use cloak_core::PeerWriter;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};

/// Registry-side half of a connection.
#[derive(Debug)]
pub struct PeerHandle {
    outbound: mpsc::Sender<Bytes>,
    shutdown: Option<oneshot::Sender<()>>,
}

/// Task-side half of a connection.
#[derive(Debug)]
pub struct PeerChannels {
    /// Encoded frames waiting to be written
    pub outbound: mpsc::Receiver<Bytes>,
    /// Fires (or errors) once the handle is closed or dropped
    pub shutdown: oneshot::Receiver<()>,
}

impl PeerHandle {
    /// Create a handle whose write queue holds `depth` frames.
    pub fn channel(depth: usize) -> (Self, PeerChannels) {
        let (outbound_tx, outbound_rx) = mpsc::channel(depth.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = Self { outbound: outbound_tx, shutdown: Some(shutdown_tx) };
        (handle, PeerChannels { outbound: outbound_rx, shutdown: shutdown_rx })
    }
}

impl PeerWriter for PeerHandle {
    fn write(&mut self, frame: Bytes) -> io::Result<usize> {
        let len = frame.len();
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(len),
            Err(TrySendError::Full(_)) => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "write queue full"))
            },
            Err(TrySendError::Closed(_)) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))
            },
        }
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // Receiver already gone means the task has exited
            let _ = shutdown.send(());
        }
    }
}
