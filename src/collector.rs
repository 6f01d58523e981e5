//! Collector-side assembly of streamed entries into a session

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RecordingConfig;
use crate::model::{Entry, Session, TargetDescriptor};
use crate::storage;
use crate::transport::{MessageBody, ServerEvent, StatusPayload, TransportMessage};
use crate::Result;

/// Accumulates what a relay streams over the transport
///
/// Entries are de-duplicated by id, so a message delivered twice after a
/// reconnect is recorded once. A status for a different session id starts
/// over.
#[derive(Debug, Default)]
pub struct Collector {
    session_id: Option<Uuid>,
    configuration: Option<RecordingConfig>,
    status: Option<StatusPayload>,
    started: Option<DateTime<Utc>>,
    ended: Option<DateTime<Utc>>,
    seen: HashSet<Uuid>,
    entries: Vec<Entry>,
    connected: bool,
    errors: usize,
}

impl Collector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume events until the server stops
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ServerEvent>) -> Self {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        self
    }

    /// Apply one server event
    pub fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => {
                info!("Recorder connected");
                self.connected = true;
            }
            ServerEvent::Disconnected => {
                info!("Recorder disconnected");
                self.connected = false;
            }
            ServerEvent::Message(message) => self.handle_message(message),
            ServerEvent::Error(e) => {
                warn!("Transport error: {}", e);
                self.errors += 1;
            }
        }
    }

    /// Apply one decoded message
    pub fn handle_message(&mut self, message: TransportMessage) {
        let received_at = message.timestamp;
        match message.body {
            MessageBody::Event(event) => self.record(event.entry),
            MessageBody::Status(status) => self.update_status(status, received_at),
            MessageBody::Error(error) => {
                warn!("Recorder reported: {}", error.message);
                self.errors += 1;
            }
            MessageBody::Command(command) => {
                debug!("Ignoring command {}", command.command);
            }
            MessageBody::Ping | MessageBody::Pong => {}
        }
    }

    fn record(&mut self, entry: Entry) {
        if !self.seen.insert(entry.id) {
            debug!("Duplicate entry {} ignored", entry.id);
            return;
        }
        if self.started.is_none() {
            self.started = Some(entry.timestamp);
        }
        self.entries.push(entry);
    }

    fn update_status(&mut self, status: StatusPayload, at: DateTime<Utc>) {
        let active = status.recording || status.paused;

        if active && status.session_id.is_some() && status.session_id != self.session_id {
            if !self.entries.is_empty() {
                info!(
                    "New session {:?}, discarding {} entries of the previous one",
                    status.session_id,
                    self.entries.len()
                );
            }
            self.session_id = status.session_id;
            self.configuration = None;
            self.entries.clear();
            self.seen.clear();
            self.started = Some(at);
            self.ended = None;
        }

        if status.session_id == self.session_id {
            if let Some(configuration) = &status.configuration {
                self.configuration = Some(configuration.clone());
            }
        }

        if active {
            self.ended = None;
        } else if self.session_id.is_some() && status.session_id == self.session_id {
            self.ended = Some(at);
        }

        self.status = Some(status);
    }

    /// Entries received so far
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Most recent status
    #[must_use]
    pub fn status(&self) -> Option<&StatusPayload> {
        self.status.as_ref()
    }

    /// Transport and decode errors seen
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Whether a recorder is currently connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Assemble what was received into a session ordered by sequence number
    #[must_use]
    pub fn session(&self, name: &str) -> Session {
        let target = self
            .status
            .as_ref()
            .and_then(|s| s.target_application.clone())
            .map(|process_name| TargetDescriptor {
                process_name,
                process_id: None,
                window_title: None,
            });

        // A recorder that never reported its configuration gets the defaults.
        let configuration = self.configuration.clone().unwrap_or_default();
        let mut session = Session::new(name, target, configuration);
        if let Some(id) = self.session_id {
            session.id = id;
        }
        if let Some(started) = self.started {
            session.start_time = started;
        }
        session.end_time = self.ended;

        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.sequence_number);
        session.entries = entries;
        session
    }

    /// Save the assembled session
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be written
    pub fn save(&self, name: &str, path: &Path) -> Result<()> {
        let session = self.session(name);
        storage::save(&session, path)?;
        info!(
            "Saved {} entries to {}",
            session.entries.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportMessage;
    use tempfile::TempDir;

    fn step(sequence: u64) -> Entry {
        let mut entry = Entry::custom("step", serde_json::json!(sequence));
        entry.sequence_number = sequence;
        entry
    }

    fn status(session_id: Uuid, recording: bool) -> TransportMessage {
        TransportMessage::status(StatusPayload {
            recording,
            paused: false,
            entry_count: 0,
            target_application: Some("demo".to_string()),
            session_id: Some(session_id),
            configuration: None,
        })
    }

    #[test]
    fn test_duplicates_dropped_and_order_restored() {
        let mut collector = Collector::new();
        let first = step(1);
        let second = step(2);

        collector.handle_message(TransportMessage::event(second.clone()));
        collector.handle_message(TransportMessage::event(first.clone()));
        collector.handle_message(TransportMessage::event(second));

        assert_eq!(collector.entry_count(), 2);
        let session = collector.session("run");
        let sequence: Vec<u64> = session.entries.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequence, vec![1, 2]);
    }

    #[test]
    fn test_status_tracks_session() {
        let mut collector = Collector::new();
        let id = Uuid::new_v4();

        collector.handle_message(status(id, true));
        collector.handle_message(TransportMessage::event(step(1)));
        collector.handle_message(status(id, false));

        let session = collector.session("run");
        assert_eq!(session.id, id);
        assert!(session.is_finalized());
        assert_eq!(session.target.unwrap().process_name, "demo");
    }

    #[test]
    fn test_session_carries_recorder_configuration() {
        let mut collector = Collector::new();
        let id = Uuid::new_v4();
        let mut configuration = RecordingConfig::default();
        configuration.max_payload_size = 512;
        configuration.capture_navigation = false;

        collector.handle_message(TransportMessage::status(StatusPayload {
            recording: true,
            paused: false,
            entry_count: 0,
            target_application: None,
            session_id: Some(id),
            configuration: Some(configuration.clone()),
        }));
        collector.handle_message(status(id, false));

        assert_eq!(collector.session("run").configuration, configuration);

        collector.handle_message(status(Uuid::new_v4(), true));
        assert_eq!(
            collector.session("run").configuration,
            RecordingConfig::default()
        );
    }

    #[test]
    fn test_new_session_starts_over() {
        let mut collector = Collector::new();
        collector.handle_message(status(Uuid::new_v4(), true));
        collector.handle_message(TransportMessage::event(step(1)));

        let next = Uuid::new_v4();
        collector.handle_message(status(next, true));
        assert_eq!(collector.entry_count(), 0);
        assert_eq!(collector.session("run").id, next);
    }

    #[test]
    fn test_errors_counted() {
        let mut collector = Collector::new();
        collector.handle(ServerEvent::Connected);
        collector.handle(ServerEvent::Error("malformed message".to_string()));
        collector.handle_message(TransportMessage::error("capture failed"));

        assert!(collector.is_connected());
        assert_eq!(collector.error_count(), 2);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("collected.json");
        let mut collector = Collector::new();
        collector.handle_message(TransportMessage::event(step(1)));

        collector.save("saved", &path).unwrap();
        let loaded = storage::load(&path).unwrap();
        assert_eq!(loaded.name, "saved");
        assert_eq!(loaded.entries.len(), 1);
    }
}
