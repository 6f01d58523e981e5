//! Recording sessions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RecordingConfig;

use super::{Entry, EntryKind};

/// Application a session was recorded against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Process or executable name
    pub process_name: String,
    /// Process id at recording time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    /// Main window title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
}

impl TargetDescriptor {
    /// Describe the current process
    #[must_use]
    pub fn current_process() -> Self {
        let process_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            process_name,
            process_id: Some(std::process::id()),
            window_title: None,
        }
    }
}

/// One recording run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: Uuid,
    /// Human-readable name
    pub name: String,
    /// When recording started
    pub start_time: DateTime<Utc>,
    /// When recording stopped; `None` while active
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Target application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetDescriptor>,
    /// Configuration snapshot taken at start
    #[serde(default)]
    pub configuration: RecordingConfig,
    /// Entries in sequence order
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl Session {
    /// Start a new, empty session
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        target: Option<TargetDescriptor>,
        configuration: RecordingConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            target,
            configuration,
            entries: Vec::new(),
        }
    }

    /// Whether the session has been stopped
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Elapsed recording time, up to now for an active session
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }

    /// Number of entries per kind
    #[must_use]
    pub fn kind_counts(&self) -> BTreeMap<EntryKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// Entries grouped by correlation id, preserving sequence order
    #[must_use]
    pub fn correlation_groups(&self) -> BTreeMap<&str, Vec<&Entry>> {
        let mut groups: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
        for entry in &self.entries {
            if let Some(id) = entry.correlation_id.as_deref() {
                groups.entry(id).or_default().push(entry);
            }
        }
        groups
    }
}
