//! Transport message envelope and line codec

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::RecordingConfig;
use crate::model::{Entry, EntryKind};
use crate::{Result, TraceError};

/// One line on the transport channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Message identifier
    pub id: Uuid,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Type discriminator and payload
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Message kinds, tagged by `type` with the payload under `payload`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum MessageBody {
    /// A recorded entry
    Event(EventPayload),
    /// Instruction for the peer
    Command(CommandPayload),
    /// Recorder status snapshot
    Status(StatusPayload),
    /// Liveness check
    Ping,
    /// Reply to a ping
    Pong,
    /// Failure report
    Error(ErrorPayload),
}

/// Payload of an `event` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Kind name of the embedded entry
    pub kind: EntryKind,
    /// The entry itself
    pub entry: Entry,
}

/// Payload of a `command` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    /// Command name
    pub command: String,
    /// Free-form arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// Payload of a `status` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Session open and accepting entries
    pub recording: bool,
    /// Session open but paused
    pub paused: bool,
    /// Entries recorded so far
    pub entry_count: usize,
    /// Process name of the recorded application
    #[serde(default)]
    pub target_application: Option<String>,
    /// Session the status belongs to
    #[serde(default)]
    pub session_id: Option<Uuid>,
    /// Configuration the session records with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<RecordingConfig>,
}

/// Payload of an `error` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// What went wrong
    pub message: String,
}

impl TransportMessage {
    /// Wrap a body in a fresh envelope
    #[must_use]
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            body,
        }
    }

    /// Event message carrying `entry`
    #[must_use]
    pub fn event(entry: Entry) -> Self {
        Self::new(MessageBody::Event(EventPayload {
            kind: entry.kind(),
            entry,
        }))
    }

    /// Status message
    #[must_use]
    pub fn status(status: StatusPayload) -> Self {
        Self::new(MessageBody::Status(status))
    }

    /// Liveness check
    #[must_use]
    pub fn ping() -> Self {
        Self::new(MessageBody::Ping)
    }

    /// Error report
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MessageBody::Error(ErrorPayload {
            message: message.into(),
        }))
    }

    /// Wire name of the message type
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self.body {
            MessageBody::Event(_) => "event",
            MessageBody::Command(_) => "command",
            MessageBody::Status(_) => "status",
            MessageBody::Ping => "ping",
            MessageBody::Pong => "pong",
            MessageBody::Error(_) => "error",
        }
    }

    /// Entry carried by an event message
    #[must_use]
    pub fn entry(&self) -> Option<&Entry> {
        match &self.body {
            MessageBody::Event(event) => Some(&event.entry),
            _ => None,
        }
    }

    /// Encode as one line, terminator included
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be serialized
    pub fn encode_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| TraceError::Validation(format!("Cannot encode message: {e}")))?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Deserialization`] if the line is not a valid
    /// message or an event's kind disagrees with its entry
    pub fn decode_line(line: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(line.trim_end())?;

        if let MessageBody::Event(event) = &message.body {
            if event.kind != event.entry.kind() {
                return Err(TraceError::Deserialization(format!(
                    "Event kind {} does not match entry kind {}",
                    event.kind,
                    event.entry.kind()
                )));
            }
        }

        Ok(message)
    }
}
