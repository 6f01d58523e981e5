//! Entry point for UI capture sources

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::CapturePolicy;
use crate::model::{Entry, EntryPayload, InteractionAction};

/// Receiver of pre-built entries from a UI capture source
///
/// Capture sources run on whatever thread the UI toolkit calls them on and
/// must never be disturbed by recording failures, so submission has no
/// return value.
pub trait CaptureSink: Send + Sync {
    /// Hand over one entry
    fn submit(&self, entry: Entry);
}

/// Drops interactions the capture policy does not want
#[derive(Debug, Default)]
pub struct InteractionFilter {
    last_value_change: HashMap<String, Instant>,
}

impl InteractionFilter {
    /// Create an empty filter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget debounce history
    pub fn reset(&mut self) {
        self.last_value_change.clear();
    }

    /// Decide whether an entry should reach the coordinator
    ///
    /// Non-interaction entries are always admitted.
    pub fn admit(&mut self, policy: &CapturePolicy, entry: &Entry, now: Instant) -> bool {
        let EntryPayload::Interaction(interaction) = &entry.payload else {
            return true;
        };
        let config = policy.config();

        if !config.capture_interactions {
            return false;
        }

        if interaction.action == InteractionAction::Navigation && !config.capture_navigation {
            return false;
        }

        let control = &interaction.control;
        if policy.is_control_excluded(&control.id)
            || control
                .name
                .as_deref()
                .is_some_and(|name| policy.is_control_excluded(name))
        {
            return false;
        }

        if interaction.action == InteractionAction::ValueChanged && config.debounce_ms > 0 {
            let window = Duration::from_millis(config.debounce_ms);
            if let Some(last) = self.last_value_change.get(&control.id) {
                if now.saturating_duration_since(*last) < window {
                    return false;
                }
            }
            self.last_value_change.insert(control.id.clone(), now);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use crate::model::{ControlIdentity, InteractionPayload};

    fn interaction(id: &str, action: InteractionAction) -> Entry {
        Entry::interaction(InteractionPayload {
            action,
            control: ControlIdentity {
                id: id.to_string(),
                name: Some(format!("{id}_name")),
                ..Default::default()
            },
            before_value: None,
            after_value: None,
            window: None,
        })
    }

    fn policy(edit: impl FnOnce(&mut RecordingConfig)) -> CapturePolicy {
        let mut config = RecordingConfig::default();
        edit(&mut config);
        CapturePolicy::new(config).unwrap()
    }

    #[test]
    fn test_debounce_value_changes() {
        let policy = policy(|c| c.debounce_ms = 300);
        let mut filter = InteractionFilter::new();
        let t0 = Instant::now();
        let entry = interaction("search", InteractionAction::ValueChanged);

        assert!(filter.admit(&policy, &entry, t0));
        assert!(!filter.admit(&policy, &entry, t0 + Duration::from_millis(100)));
        assert!(filter.admit(&policy, &entry, t0 + Duration::from_millis(400)));

        let other = interaction("name", InteractionAction::ValueChanged);
        assert!(filter.admit(&policy, &other, t0 + Duration::from_millis(401)));
    }

    #[test]
    fn test_clicks_are_not_debounced() {
        let policy = policy(|_| {});
        let mut filter = InteractionFilter::new();
        let t0 = Instant::now();
        let entry = interaction("ok", InteractionAction::Click);

        assert!(filter.admit(&policy, &entry, t0));
        assert!(filter.admit(&policy, &entry, t0));
    }

    #[test]
    fn test_navigation_toggle() {
        let policy = policy(|c| c.capture_navigation = false);
        let mut filter = InteractionFilter::new();
        let nav = interaction("tab", InteractionAction::Navigation);
        assert!(!filter.admit(&policy, &nav, Instant::now()));
    }

    #[test]
    fn test_excluded_control_by_name() {
        let policy = policy(|c| c.excluded_controls = vec!["secret_name".to_string()]);
        let mut filter = InteractionFilter::new();
        let entry = interaction("secret", InteractionAction::Click);
        assert!(!filter.admit(&policy, &entry, Instant::now()));
    }

    #[test]
    fn test_interactions_disabled_but_custom_passes() {
        let policy = policy(|c| c.capture_interactions = false);
        let mut filter = InteractionFilter::new();
        let click = interaction("ok", InteractionAction::Click);
        let custom = Entry::custom("marker", serde_json::Value::Null);

        assert!(!filter.admit(&policy, &click, Instant::now()));
        assert!(filter.admit(&policy, &custom, Instant::now()));
    }
}
