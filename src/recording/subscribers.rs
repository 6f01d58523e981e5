//! Fan-out of coordinator notifications

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry of callbacks notified in registration order
///
/// Callbacks run against a snapshot of the registry, so subscribing or
/// unsubscribing from inside a callback never deadlocks. Changes take
/// effect from the next notification.
pub struct Subscribers<T> {
    next_id: AtomicU64,
    callbacks: Arc<DashMap<u64, Callback<T>>>,
}

impl<T: 'static> Subscribers<T> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: Arc::new(DashMap::new()),
        }
    }

    /// Register a callback
    ///
    /// The callback stays registered until the returned [`Subscription`]
    /// is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.insert(id, Arc::new(callback));

        let registry: Weak<DashMap<u64, Callback<T>>> = Arc::downgrade(&self.callbacks);
        Subscription {
            id,
            remove: Some(Box::new(move || {
                if let Some(callbacks) = registry.upgrade() {
                    callbacks.remove(&id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `value`
    pub fn publish(&self, value: &T) {
        let mut snapshot: Vec<(u64, Callback<T>)> = self
            .callbacks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        for (_, callback) in snapshot {
            callback(value);
        }
    }

    /// Number of registered callbacks
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callback is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that keeps a callback registered
pub struct Subscription {
    id: u64,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Identifier of the subscription within its registry
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the callback now
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the callback registered for the lifetime of the registry
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
