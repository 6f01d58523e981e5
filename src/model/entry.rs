//! One captured occurrence

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, TraceError};

/// Kind discriminator for an [`Entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// User interaction with a control
    Interaction,
    /// Outgoing network request
    OutgoingRequest,
    /// Completion or failure of an outgoing request
    OutgoingResponse,
    /// Application-defined entry
    Custom,
}

impl EntryKind {
    /// Wire name of the kind
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interaction => "interaction",
            Self::OutgoingRequest => "outgoing_request",
            Self::OutgoingResponse => "outgoing_response",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single captured occurrence
///
/// Producers build entries with [`Entry::interaction`], [`Entry::request`],
/// [`Entry::response`] or [`Entry::custom`]. The sequence number stays 0
/// until the coordinator accepts the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Globally unique identifier
    pub id: Uuid,
    /// Creation time on the producing thread
    pub timestamp: DateTime<Utc>,
    /// Coordinator-assigned position in the session
    #[serde(default)]
    pub sequence_number: u64,
    /// Grouping key for causally related entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Kind-specific payload
    #[serde(flatten)]
    pub payload: EntryPayload,
}

/// Kind-tagged payload of an [`Entry`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    /// User interaction
    Interaction(InteractionPayload),
    /// Outgoing request
    OutgoingRequest(HttpPayload),
    /// Outgoing response
    OutgoingResponse(HttpPayload),
    /// Application-defined payload
    Custom(CustomPayload),
}

/// What the user did to a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    /// Button press or click
    Click,
    /// Text or value edit
    ValueChanged,
    /// Selection change in a list, tree or combo
    SelectionChanged,
    /// Checkbox or toggle flip
    Toggled,
    /// Key press not tied to a value change
    KeyPress,
    /// Focus moved to the control
    Focus,
    /// Page, tab or window navigation
    Navigation,
}

/// Identity of the control an interaction targeted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlIdentity {
    /// Stable identifier (automation id or generated path)
    pub id: String,
    /// Developer-facing name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Control type, e.g. `button`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    /// Visible text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Interaction payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionPayload {
    /// Action performed
    pub action: InteractionAction,
    /// Target control
    pub control: ControlIdentity,
    /// Value before the interaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_value: Option<String>,
    /// Value after the interaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_value: Option<String>,
    /// Title of the window the control lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

/// Payload shared by outgoing requests and responses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpPayload {
    /// Identifier shared by exactly one request/response pair
    pub pair_id: String,
    /// HTTP method
    pub method: String,
    /// Full URL
    pub url: String,
    /// URL path
    #[serde(default)]
    pub path: String,
    /// Decoded query parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Headers; `None` when the call produced none at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Captured body or a size placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Status code (responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Call duration in milliseconds (responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Whether the call succeeded
    #[serde(default)]
    pub success: bool,
    /// Error raised by the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Application-defined payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPayload {
    /// Free-form name
    pub name: String,
    /// Arbitrary data
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Entry {
    fn with_payload(payload: EntryPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence_number: 0,
            correlation_id: None,
            payload,
        }
    }

    /// Create an interaction entry
    #[must_use]
    pub fn interaction(payload: InteractionPayload) -> Self {
        Self::with_payload(EntryPayload::Interaction(payload))
    }

    /// Create an outgoing-request entry
    #[must_use]
    pub fn request(payload: HttpPayload) -> Self {
        Self::with_payload(EntryPayload::OutgoingRequest(payload))
    }

    /// Create an outgoing-response entry
    #[must_use]
    pub fn response(payload: HttpPayload) -> Self {
        Self::with_payload(EntryPayload::OutgoingResponse(payload))
    }

    /// Create a custom entry
    #[must_use]
    pub fn custom(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self::with_payload(EntryPayload::Custom(CustomPayload {
            name: name.into(),
            data,
        }))
    }

    /// Attach a correlation id
    #[must_use]
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Kind discriminator
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self.payload {
            EntryPayload::Interaction(_) => EntryKind::Interaction,
            EntryPayload::OutgoingRequest(_) => EntryKind::OutgoingRequest,
            EntryPayload::OutgoingResponse(_) => EntryKind::OutgoingResponse,
            EntryPayload::Custom(_) => EntryKind::Custom,
        }
    }

    /// Interaction payload, if this is an interaction
    #[must_use]
    pub fn as_interaction(&self) -> Option<&InteractionPayload> {
        match &self.payload {
            EntryPayload::Interaction(p) => Some(p),
            _ => None,
        }
    }

    /// Network payload, if this is a request or response
    #[must_use]
    pub fn as_http(&self) -> Option<&HttpPayload> {
        match &self.payload {
            EntryPayload::OutgoingRequest(p) | EntryPayload::OutgoingResponse(p) => Some(p),
            _ => None,
        }
    }

    /// Whether a non-blank correlation id is set
    #[must_use]
    pub fn has_correlation(&self) -> bool {
        self.correlation_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Check the payload is well formed
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first missing field
    pub fn validate(&self) -> Result<()> {
        match &self.payload {
            EntryPayload::Interaction(p) => {
                if p.control.id.trim().is_empty() {
                    return Err(TraceError::Validation(
                        "interaction entry has no control id".to_string(),
                    ));
                }
            }
            EntryPayload::OutgoingRequest(p) | EntryPayload::OutgoingResponse(p) => {
                if p.method.is_empty() {
                    return Err(TraceError::Validation(format!(
                        "{} entry has no method",
                        self.kind()
                    )));
                }
                if p.url.is_empty() {
                    return Err(TraceError::Validation(format!(
                        "{} entry has no url",
                        self.kind()
                    )));
                }
                if p.pair_id.is_empty() {
                    return Err(TraceError::Validation(format!(
                        "{} entry has no pair id",
                        self.kind()
                    )));
                }
            }
            EntryPayload::Custom(p) => {
                if p.name.is_empty() {
                    return Err(TraceError::Validation(
                        "custom entry has no name".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
