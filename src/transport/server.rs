//! Receiving side of the transport channel

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::{Result, TraceError};

use super::channel::socket_path;
use super::message::TransportMessage;

/// Wait for the listener task to finish on stop
const SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Notification raised by a running server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A client connected
    Connected,
    /// The client went away or its connection failed
    Disconnected,
    /// A message was decoded
    Message(TransportMessage),
    /// A line could not be decoded or the channel failed
    Error(String),
}

/// How a connection's read loop ended
enum ReadOutcome {
    Closed,
    Failed(std::io::Error),
    Shutdown,
}

/// Listens on a channel and reads messages from one client at a time
#[derive(Debug)]
pub struct TransportServer {
    path: PathBuf,
    retry_delay: Duration,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportServer {
    /// Create a stopped server for `channel`
    #[must_use]
    pub fn new(channel: &str, config: &TransportConfig) -> Self {
        Self {
            path: socket_path(channel),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Socket this server listens on
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the listener task is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Bind the socket and start listening
    ///
    /// A socket file left behind by a previous run is removed first. Events
    /// arrive on the returned receiver, which closes once the server stops.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::InvalidState`] if already started, or an I/O
    /// error if the socket cannot be bound
    pub fn start(&self) -> Result<mpsc::UnboundedReceiver<ServerEvent>> {
        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.is_some() {
            return Err(TraceError::InvalidState {
                operation: "start server",
                state: "listening".to_string(),
            });
        }

        if self.path.exists() {
            debug!("Removing stale socket {}", self.path.display());
            std::fs::remove_file(&self.path)?;
        }

        let listener = UnixListener::bind(&self.path)?;
        info!("Listening on {}", self.path.display());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(listener, self.retry_delay, events_tx, shutdown_rx));

        *shutdown_slot = Some(shutdown_tx);
        *self.task.lock() = Some(task);

        Ok(events_rx)
    }

    /// Stop listening and remove the socket file; safe to call repeatedly
    ///
    /// An in-flight accept or read is cancelled.
    pub async fn stop(&self) {
        let Some(shutdown_tx) = self.shutdown_tx.lock().take() else {
            return;
        };
        shutdown_tx.send(()).ok();

        let task = self.task.lock().take();
        if let Some(task) = task {
            let timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("Listener task did not stop within {:?}", timeout);
            }
        }

        self.remove_socket();
        info!("Stopped listening on {}", self.path.display());
    }

    fn remove_socket(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.get_mut().take() {
            shutdown_tx.send(()).ok();
            self.remove_socket();
        }
    }
}

async fn run(
    listener: UnixListener,
    retry_delay: Duration,
    events: mpsc::UnboundedSender<ServerEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown_rx.recv() => break,
        };

        match accepted {
            Ok((stream, _)) => {
                info!("Collector client connected");
                events.send(ServerEvent::Connected).ok();

                let outcome = read_connection(stream, &events, &mut shutdown_rx).await;
                events.send(ServerEvent::Disconnected).ok();

                match outcome {
                    ReadOutcome::Closed => info!("Collector client disconnected"),
                    ReadOutcome::Shutdown => break,
                    ReadOutcome::Failed(e) => {
                        error!("Read from client failed: {}", e);
                        events
                            .send(ServerEvent::Error(format!("read failed: {e}")))
                            .ok();
                        if pause(retry_delay, &mut shutdown_rx).await {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Accept error: {}", e);
                events
                    .send(ServerEvent::Error(format!("accept failed: {e}")))
                    .ok();
                if pause(retry_delay, &mut shutdown_rx).await {
                    break;
                }
            }
        }
    }

    debug!("Listener task finished");
}

/// Sleep for `delay`; returns true if shutdown was requested meanwhile
async fn pause(delay: Duration, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        _ = shutdown_rx.recv() => true,
    }
}

async fn read_connection(
    stream: UnixStream,
    events: &mpsc::UnboundedSender<ServerEvent>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> ReadOutcome {
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = tokio::select! {
            result = lines.next_line() => result,
            _ = shutdown_rx.recv() => return ReadOutcome::Shutdown,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match TransportMessage::decode_line(&line) {
                    Ok(message) => {
                        events.send(ServerEvent::Message(message)).ok();
                    }
                    Err(e) => {
                        warn!("Skipping malformed message: {}", e);
                        events
                            .send(ServerEvent::Error(format!("malformed message: {e}")))
                            .ok();
                    }
                }
            }
            Ok(None) => return ReadOutcome::Closed,
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
}
