//! Recording coordinator: session lifecycle, ordering and fan-out

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CapturePolicy, RecordingConfig};
use crate::model::{Entry, Session, TargetDescriptor};
use crate::storage;
use crate::{Result, TraceError};

use super::correlation::CorrelationContext;
use super::sink::{CaptureSink, InteractionFilter};
use super::subscribers::{Subscribers, Subscription};

/// Lifecycle state of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No session is being recorded
    Idle,
    /// Entries are being accepted
    Recording,
    /// Session is open but entries are dropped
    Paused,
}

impl RecordingState {
    /// Whether a session is open (recording or paused)
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
        })
    }
}

/// Notification emitted on every lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition
    pub previous: RecordingState,
    /// State after the transition
    pub current: RecordingState,
    /// Session the transition belongs to
    pub session_id: Option<Uuid>,
    /// Entries recorded so far
    pub entry_count: usize,
    /// Process name of the recorded application
    pub target_application: Option<String>,
    /// Configuration snapshot of the session
    pub configuration: Option<RecordingConfig>,
}

struct Inner {
    state: RecordingState,
    session: Option<Session>,
    entries: Vec<Arc<Entry>>,
    next_sequence: u64,
    policy: Arc<CapturePolicy>,
}

impl Inner {
    fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    fn target_application(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|s| s.target.as_ref())
            .map(|t| t.process_name.clone())
    }

    fn change(&self, previous: RecordingState) -> StateChange {
        StateChange {
            previous,
            current: self.state,
            session_id: self.session_id(),
            entry_count: self.entries.len(),
            target_application: self.target_application(),
            configuration: self.session.as_ref().map(|s| s.configuration.clone()),
        }
    }

    fn invalid(&self, operation: &'static str) -> TraceError {
        TraceError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn snapshot(&self) -> Option<Session> {
        self.session.as_ref().map(|session| {
            let mut session = session.clone();
            session.entries = self.entries.iter().map(|e| Entry::clone(e)).collect();
            session
        })
    }
}

/// The single serialization point for every producer
///
/// One instance is constructed by the host application and shared (usually
/// behind an `Arc`) with the interceptor, UI capture sources and the relay.
///
/// Acceptance of an entry (sequence number, append, notification) happens
/// under an ordering lock, so subscribers observe entries in sequence order
/// even though producers run on arbitrary threads. Notification runs after
/// the state lock is released, so callbacks may query the coordinator.
pub struct Coordinator {
    inner: Mutex<Inner>,
    ordering: ReentrantMutex<()>,
    correlation: RwLock<CorrelationContext>,
    filter: Mutex<InteractionFilter>,
    entry_subscribers: Subscribers<Arc<Entry>>,
    state_subscribers: Subscribers<StateChange>,
}

impl Coordinator {
    /// Create an idle coordinator with the given configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: RecordingConfig) -> Result<Self> {
        let policy = Arc::new(CapturePolicy::new(config)?);
        Ok(Self {
            inner: Mutex::new(Inner {
                state: RecordingState::Idle,
                session: None,
                entries: Vec::new(),
                next_sequence: 1,
                policy,
            }),
            ordering: ReentrantMutex::new(()),
            correlation: RwLock::new(CorrelationContext::new()),
            filter: Mutex::new(InteractionFilter::new()),
            entry_subscribers: Subscribers::new(),
            state_subscribers: Subscribers::new(),
        })
    }

    /// Replace the configuration used by the next session
    ///
    /// # Errors
    ///
    /// Returns error if a session is open or the configuration is invalid
    pub fn configure(&self, config: RecordingConfig) -> Result<()> {
        let policy = Arc::new(CapturePolicy::new(config)?);
        let mut inner = self.inner.lock();
        if inner.state.is_active() {
            return Err(inner.invalid("configure"));
        }
        inner.policy = policy;
        Ok(())
    }

    /// Start a new session
    ///
    /// Clears the previous entry log and mints a fresh correlation context.
    /// Returns the id of the new session, or of the open one if a session
    /// is already active.
    pub fn start(&self, name: Option<&str>, target: Option<TargetDescriptor>) -> Uuid {
        let _order = self.ordering.lock();

        let change = {
            let mut inner = self.inner.lock();
            if inner.state.is_active() {
                if let Some(id) = inner.session_id() {
                    debug!("Start ignored, session {} already {}", id, inner.state);
                    return id;
                }
            }

            let name = name
                .filter(|n| !n.trim().is_empty())
                .map_or_else(
                    || format!("Session {}", Utc::now().format("%Y-%m-%d %H:%M:%S")),
                    |n| n.to_string(),
                );
            let session = Session::new(name, target, inner.policy.config().clone());
            let session_id = session.id;

            inner.entries.clear();
            inner.next_sequence = 1;
            inner.session = Some(session);
            let previous = inner.state;
            inner.state = RecordingState::Recording;

            *self.correlation.write() = CorrelationContext::new();
            self.filter.lock().reset();

            info!("Recording started (session: {})", session_id);
            inner.change(previous)
        };

        let session_id = change.session_id.unwrap_or_default();
        self.state_subscribers.publish(&change);
        session_id
    }

    /// Stop the open session and return its finalized snapshot
    ///
    /// Returns `None` when already idle.
    pub fn stop(&self) -> Option<Session> {
        let _order = self.ordering.lock();

        let (change, session) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_active() {
                debug!("Stop ignored, coordinator idle");
                return None;
            }

            let previous = inner.state;
            inner.state = RecordingState::Idle;
            let end_time = Utc::now();
            let entries: Vec<Entry> = inner.entries.iter().map(|e| Entry::clone(e)).collect();
            let session = inner.session.as_mut().map(|session| {
                session.end_time = Some(end_time.max(session.start_time));
                session.entries = entries;
                session.clone()
            });

            info!(
                "Recording stopped ({} entries, session: {:?})",
                inner.entries.len(),
                inner.session_id()
            );
            (inner.change(previous), session)
        };

        self.state_subscribers.publish(&change);
        session
    }

    /// Stop accepting entries without closing the session
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::InvalidState`] unless recording
    pub fn pause(&self) -> Result<()> {
        self.transition("pause", RecordingState::Recording, RecordingState::Paused)
    }

    /// Resume a paused session
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::InvalidState`] unless paused
    pub fn resume(&self) -> Result<()> {
        self.transition("resume", RecordingState::Paused, RecordingState::Recording)
    }

    fn transition(
        &self,
        operation: &'static str,
        from: RecordingState,
        to: RecordingState,
    ) -> Result<()> {
        let _order = self.ordering.lock();

        let change = {
            let mut inner = self.inner.lock();
            if inner.state != from {
                return Err(inner.invalid(operation));
            }
            inner.state = to;
            info!("Recording {} (session: {:?})", to, inner.session_id());
            inner.change(from)
        };

        self.state_subscribers.publish(&change);
        Ok(())
    }

    /// Empty the entry log and drop the current session
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::InvalidState`] while a session is open
    pub fn clear(&self) -> Result<()> {
        let _order = self.ordering.lock();
        let mut inner = self.inner.lock();
        if inner.state.is_active() {
            return Err(inner.invalid("clear"));
        }
        inner.entries.clear();
        inner.session = None;
        inner.next_sequence = 1;
        debug!("Recording log cleared");
        Ok(())
    }

    /// Accept an entry into the open session
    ///
    /// An entry without a correlation id inherits the ambient one. Returns
    /// the assigned sequence number, or `None` when the entry was dropped
    /// because the coordinator is not recording. Subscribers have been
    /// notified by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::NullEntry`] for an absent entry and
    /// [`TraceError::Validation`] for a malformed one. Neither changes the
    /// entry count or the sequence counter.
    pub fn add_entry(&self, entry: impl Into<Option<Entry>>) -> Result<Option<u64>> {
        let Some(mut entry) = entry.into() else {
            return Err(TraceError::NullEntry);
        };
        entry.validate()?;

        let _order = self.ordering.lock();

        if !entry.has_correlation() {
            entry.correlation_id = self.correlation.read().current();
        }

        let accepted = {
            let mut inner = self.inner.lock();
            if inner.state != RecordingState::Recording {
                debug!("Dropping {} entry while {}", entry.kind(), inner.state);
                return Ok(None);
            }

            entry.sequence_number = inner.next_sequence;
            inner.next_sequence += 1;
            let entry = Arc::new(entry);
            inner.entries.push(Arc::clone(&entry));
            entry
        };

        self.entry_subscribers.publish(&accepted);
        Ok(Some(accepted.sequence_number))
    }

    /// Mint a correlation id and make it ambient
    pub fn new_correlation_id(&self) -> String {
        self.correlation.read().new_id()
    }

    /// Set the ambient correlation id
    pub fn set_correlation_id(&self, id: impl Into<String>) {
        self.correlation.read().set(id);
    }

    /// Clear the ambient correlation id
    pub fn clear_correlation_id(&self) {
        self.correlation.read().clear();
    }

    /// Correlation context of the current session
    #[must_use]
    pub fn correlation(&self) -> CorrelationContext {
        self.correlation.read().clone()
    }

    /// Subscribe to accepted entries
    pub fn subscribe_entries<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<Entry>) + Send + Sync + 'static,
    {
        self.entry_subscribers.subscribe(callback)
    }

    /// Subscribe to lifecycle transitions
    pub fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.state_subscribers.subscribe(callback)
    }

    /// Report the current status and subscribe to everything after it
    ///
    /// `on_state` first receives a snapshot (previous equals current), then
    /// every later transition. No entry or transition can slip in between
    /// the snapshot and the subscriptions.
    pub fn attach<E, S>(&self, on_entry: E, on_state: S) -> (Subscription, Subscription)
    where
        E: Fn(&Arc<Entry>) + Send + Sync + 'static,
        S: Fn(&StateChange) + Send + Sync + 'static,
    {
        let _order = self.ordering.lock();
        let snapshot = {
            let inner = self.inner.lock();
            inner.change(inner.state)
        };
        on_state(&snapshot);

        (
            self.entry_subscribers.subscribe(on_entry),
            self.state_subscribers.subscribe(on_state),
        )
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.inner.lock().state
    }

    /// Whether entries are currently accepted
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    /// Number of entries in the log
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Snapshot of the entry log in sequence order
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.inner.lock().entries.clone()
    }

    /// Snapshot of the current session including its entries
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.lock().snapshot()
    }

    /// Capture policy of the current (or next) session
    #[must_use]
    pub fn policy(&self) -> Arc<CapturePolicy> {
        Arc::clone(&self.inner.lock().policy)
    }

    /// Write the current session to `path`
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::InvalidState`] when there is no session, or
    /// the underlying I/O error
    pub fn save(&self, path: &Path) -> Result<()> {
        let session = {
            let inner = self.inner.lock();
            inner.snapshot().ok_or_else(|| inner.invalid("save"))?
        };
        storage::save(&session, path)?;
        info!("Saved session {} to {}", session.id, path.display());
        Ok(())
    }

    /// Replace the log with a stored session
    ///
    /// Nothing changes unless the file parses completely.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::InvalidState`] while a session is open, or
    /// [`TraceError::Deserialization`] for an unparsable file
    pub fn load(&self, path: &Path) -> Result<Session> {
        if self.state().is_active() {
            return Err(TraceError::InvalidState {
                operation: "load",
                state: self.state().to_string(),
            });
        }

        let session = storage::load(path)?;

        let _order = self.ordering.lock();
        let mut inner = self.inner.lock();
        if inner.state.is_active() {
            return Err(inner.invalid("load"));
        }
        inner.entries = session.entries.iter().cloned().map(Arc::new).collect();
        inner.next_sequence = session
            .entries
            .iter()
            .map(|e| e.sequence_number)
            .max()
            .unwrap_or(0)
            + 1;
        inner.session = Some(session.clone());
        info!(
            "Loaded session {} ({} entries) from {}",
            session.id,
            inner.entries.len(),
            path.display()
        );
        Ok(session)
    }
}

impl CaptureSink for Coordinator {
    fn submit(&self, entry: Entry) {
        let policy = self.policy();
        if !self.filter.lock().admit(&policy, &entry, Instant::now()) {
            debug!("Filtered {} entry", entry.kind());
            return;
        }

        if let Err(e) = self.add_entry(entry) {
            warn!("Captured entry rejected: {}", e);
        }
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Coordinator")
            .field("state", &inner.state)
            .field("session", &inner.session_id())
            .field("entries", &inner.entries.len())
            .finish_non_exhaustive()
    }
}
