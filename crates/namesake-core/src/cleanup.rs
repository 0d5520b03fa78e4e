use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::EngineError;

/// Token for cooperative cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns Ok(()) to continue, Err if cancelled.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Identifies one registered cleanup closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupHandle(usize);

/// Run-scoped registry of cleanup closures.
///
/// Each closure runs at most once through [`CleanupScope::run_all`], or never
/// after [`CleanupScope::deregister`].
/// Clones share the same registry, so an interrupt handler can hold one.
#[derive(Clone, Default)]
pub struct CleanupScope {
    entries: Arc<Mutex<Vec<Option<(String, CleanupFn)>>>>,
}

impl CleanupScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, label: impl Into<String>, f: F) -> CleanupHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(Some((label.into(), Box::new(f))));
        CleanupHandle(entries.len() - 1)
    }

    /// Drop a closure without running it. Unknown or spent handles are ignored.
    pub fn deregister(&self, handle: CleanupHandle) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = entries.get_mut(handle.0) {
            slot.take();
        }
    }

    /// Run every remaining closure in registration order.
    pub fn run_all(&self) {
        // Take the closures out first so a closure may touch the scope.
        let pending: Vec<(String, CleanupFn)> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.iter_mut().filter_map(Option::take).collect()
        };
        for (label, f) in pending {
            debug!(cleanup = %label, "running cleanup");
            f();
        }
    }
}
