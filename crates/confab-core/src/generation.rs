//! Reload-generation signal.
//!
//! Every successful registry reload bumps a monotonic generation counter.
//! Downstream caches (resolved-metadata caches live outside the engine)
//! subscribe here and invalidate themselves when the generation changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Callback invoked with the new generation after a successful reload.
pub type GenerationSubscriber = Box<dyn Fn(u64) + Send + Sync>;

/// Monotonic reload counter with subscriber fan-out.
///
/// Cheap to clone; clones share the same counter and subscriber list.
#[derive(Clone, Default)]
pub struct GenerationSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    generation: AtomicU64,
    subscribers: Mutex<Vec<GenerationSubscriber>>,
}

impl GenerationSignal {
    /// Create a signal at generation zero with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation. Zero means no successful reload yet.
    pub fn current(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Register a callback invoked on every future bump.
    pub fn subscribe(&self, subscriber: GenerationSubscriber) {
        self.inner.subscribers.lock().push(subscriber);
    }

    /// Advance the generation and notify all subscribers.
    ///
    /// Returns the new generation.
    pub fn bump(&self) -> u64 {
        let next = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        for subscriber in self.inner.subscribers.lock().iter() {
            subscriber(next);
        }
        next
    }
}

impl std::fmt::Debug for GenerationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSignal")
            .field("generation", &self.current())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
