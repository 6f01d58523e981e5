//! Sending side of the transport channel

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::{Result, TraceError};

use super::channel::socket_path;
use super::message::TransportMessage;

/// Connects to a collector and writes messages to it
///
/// Every write goes through one async mutex that also owns the stream, so
/// lines from concurrent senders never interleave.
#[derive(Debug)]
pub struct TransportClient {
    path: PathBuf,
    connect_timeout: Duration,
    stream: Mutex<Option<UnixStream>>,
    connected: AtomicBool,
    connect_attempts: AtomicU64,
}

impl TransportClient {
    /// Create a disconnected client for `channel`
    #[must_use]
    pub fn new(channel: &str, config: &TransportConfig) -> Self {
        Self {
            path: socket_path(channel),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
        }
    }

    /// Socket this client connects to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the last connect or write succeeded
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connection attempts made so far
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Make a single connection attempt bounded by `timeout`
    ///
    /// Returns whether the client is connected afterwards. An existing
    /// connection is replaced.
    pub async fn connect(&self, timeout: Duration) -> bool {
        let mut stream = self.stream.lock().await;
        self.connect_locked(&mut stream, timeout).await
    }

    async fn connect_locked(&self, slot: &mut Option<UnixStream>, timeout: Duration) -> bool {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(timeout, UnixStream::connect(&self.path)).await {
            Ok(Ok(stream)) => {
                info!("Connected to collector at {}", self.path.display());
                *slot = Some(stream);
                self.connected.store(true, Ordering::Release);
                true
            }
            Ok(Err(e)) => {
                debug!("Connect to {} failed: {}", self.path.display(), e);
                *slot = None;
                self.connected.store(false, Ordering::Release);
                false
            }
            Err(_) => {
                debug!(
                    "Connect to {} timed out after {:?}",
                    self.path.display(),
                    timeout
                );
                *slot = None;
                self.connected.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Write one message
    ///
    /// While disconnected, exactly one reconnect attempt is made first. A
    /// failed write drops the connection; the next send reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::ConnectionFailure`] if the collector cannot be
    /// reached or the write fails
    pub async fn send(&self, message: &TransportMessage) -> Result<()> {
        let line = message.encode_line()?;

        let mut slot = self.stream.lock().await;
        if slot.is_none() && !self.connect_locked(&mut slot, self.connect_timeout).await {
            return Err(TraceError::ConnectionFailure(format!(
                "could not reach collector at {}",
                self.path.display()
            )));
        }

        let Some(stream) = slot.as_mut() else {
            return Err(TraceError::ConnectionFailure("not connected".to_string()));
        };

        if let Err(e) = stream.write_all(line.as_bytes()).await {
            warn!("Write to collector failed, disconnecting: {}", e);
            *slot = None;
            self.connected.store(false, Ordering::Release);
            return Err(TraceError::ConnectionFailure(format!(
                "write to collector failed: {e}"
            )));
        }

        Ok(())
    }

    /// Send a liveness check
    ///
    /// # Errors
    ///
    /// Same as [`TransportClient::send`]
    pub async fn ping(&self) -> Result<()> {
        self.send(&TransportMessage::ping()).await
    }

    /// Close the connection; safe to call repeatedly
    pub async fn disconnect(&self) {
        let mut slot = self.stream.lock().await;
        if let Some(mut stream) = slot.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of collector connection failed: {}", e);
            }
            info!("Disconnected from collector");
        }
        self.connected.store(false, Ordering::Release);
    }
}
