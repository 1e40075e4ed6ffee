//! Process-wide lookup from body identity to its future waiter.

use super::FutureWaiter;
use crate::tracing_compat::trace;
use crate::types::BodyId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

static GLOBAL: OnceLock<Arc<FutureWaiterRegistry>> = OnceLock::new();

/// Maps each body to the [`FutureWaiter`] that schedules its requests.
///
/// Entries hold weak references: a dropped executor disappears from the
/// registry on the next lookup even if it never unregistered.
pub struct FutureWaiterRegistry {
    waiters: RwLock<HashMap<BodyId, Weak<dyn FutureWaiter>>>,
}

impl FutureWaiterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers `waiter` for `body`, replacing any previous entry.
    ///
    /// Returns true if a live waiter was replaced.
    pub fn register(&self, body: BodyId, waiter: &Arc<dyn FutureWaiter>) -> bool {
        let previous = self.waiters.write().insert(body, Arc::downgrade(waiter));
        trace!(body = %body, "future waiter registered");
        previous.is_some_and(|w| w.strong_count() > 0)
    }

    /// Removes the entry for `body`.
    pub fn unregister(&self, body: BodyId) -> bool {
        let removed = self.waiters.write().remove(&body).is_some();
        if removed {
            trace!(body = %body, "future waiter unregistered");
        }
        removed
    }

    /// Returns the waiter registered for `body`, if it is still alive.
    #[must_use]
    pub fn lookup(&self, body: BodyId) -> Option<Arc<dyn FutureWaiter>> {
        let found = self.waiters.read().get(&body).map(Weak::upgrade);
        match found {
            Some(Some(waiter)) => Some(waiter),
            Some(None) => {
                let mut waiters = self.waiters.write();
                if waiters.get(&body).is_some_and(|w| w.strong_count() == 0) {
                    waiters.remove(&body);
                }
                None
            }
            None => None,
        }
    }

    /// Number of registered bodies, including ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.read().len()
    }

    /// Returns true if no body is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.read().is_empty()
    }
}

impl Default for FutureWaiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FutureWaiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureWaiterRegistry")
            .field("bodies", &self.len())
            .finish()
    }
}
