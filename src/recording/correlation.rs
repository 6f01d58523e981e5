//! Ambient correlation ids

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

/// Handle to the ambient correlation id of one recording session
///
/// Cloning is cheap; all clones share the same ambient id. The coordinator
/// hands out a fresh context on every start, so ids minted by one session
/// never collide with another.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    seed: String,
    counter: AtomicU64,
    current: RwLock<Option<String>>,
}

impl CorrelationContext {
    /// Create a context with a random seed
    #[must_use]
    pub fn new() -> Self {
        let seed = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self::with_seed(seed)
    }

    /// Create a context with a fixed seed
    #[must_use]
    pub fn with_seed(seed: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                seed: seed.into(),
                counter: AtomicU64::new(0),
                current: RwLock::new(None),
            }),
        }
    }

    /// Seed all ids of this context start with
    #[must_use]
    pub fn seed(&self) -> &str {
        &self.inner.seed
    }

    /// Mint a fresh id without touching the ambient id
    #[must_use]
    pub fn next_id(&self) -> String {
        let n = self.inner.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n:04}", self.inner.seed)
    }

    /// Mint a fresh id and make it the ambient id
    pub fn new_id(&self) -> String {
        let id = self.next_id();
        *self.inner.current.write() = Some(id.clone());
        id
    }

    /// Set the ambient id; a blank id clears it
    pub fn set(&self, id: impl Into<String>) {
        let id = id.into();
        let mut current = self.inner.current.write();
        *current = if id.trim().is_empty() { None } else { Some(id) };
    }

    /// Clear the ambient id
    pub fn clear(&self) {
        *self.inner.current.write() = None;
    }

    /// Current ambient id
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.inner.current.read().clone()
    }

    /// Set the ambient id until the returned guard is dropped
    #[must_use = "the ambient id is restored when the scope is dropped"]
    pub fn scope(&self, id: impl Into<String>) -> CorrelationScope {
        let previous = self.current();
        self.set(id);
        CorrelationScope {
            context: self.clone(),
            previous,
        }
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the previous ambient id on drop
#[derive(Debug)]
pub struct CorrelationScope {
    context: CorrelationContext,
    previous: Option<String>,
}

impl Drop for CorrelationScope {
    fn drop(&mut self) {
        *self.context.inner.current.write() = self.previous.take();
    }
}
