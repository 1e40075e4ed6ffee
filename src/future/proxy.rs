//! A concrete future whose waits are delegated to the body's scheduler.

use super::{AwaitedFuture, FutureWaiter, WaitOutcome};
use crate::executor::ServeContext;
use crate::tracing_compat::trace;
use crate::types::FutureId;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// A write-once result slot that implements wait-by-necessity.
///
/// A serving request calls [`wait`](Self::wait) (or [`get`](Self::get)) with
/// its [`ServeContext`]. If the value is missing and the body has a
/// [`FutureWaiter`] in the context's registry, the wait is delegated to it;
/// otherwise the calling thread blocks on the proxy directly. Whoever
/// computes the value calls [`resolve`](Self::resolve), which wakes direct
/// waiters and reports the arrival to every waiter that parked a request on
/// this proxy.
pub struct FutureProxy<T> {
    id: FutureId,
    state: Mutex<ProxyState<T>>,
    condvar: Condvar,
}

struct ProxyState<T> {
    value: Option<T>,
    interested: Vec<Weak<dyn FutureWaiter>>,
}

impl<T: Clone + Send> FutureProxy<T> {
    /// Creates an unresolved future with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: FutureId::next(),
            state: Mutex::new(ProxyState {
                value: None,
                interested: Vec::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Stores the value and reports the arrival.
    ///
    /// The first resolution wins; returns false if a value was already set.
    pub fn resolve(&self, value: T) -> bool {
        let interested = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value);
            self.condvar.notify_all();
            std::mem::take(&mut state.interested)
        };
        trace!(future = %self.id, waiters = interested.len(), "future resolved");
        for waiter in interested.iter().filter_map(Weak::upgrade) {
            waiter.future_arrived(self.id);
        }
        true
    }

    /// Returns a copy of the value if it has arrived.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    /// Waits for the value on behalf of the request described by `cx`.
    pub fn wait(&self, cx: &ServeContext, deadline: Option<Instant>) -> WaitOutcome {
        let waiter = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return WaitOutcome::Available;
            }
            match cx.registry().lookup(cx.body()) {
                Some(waiter) => {
                    let weak = Arc::downgrade(&waiter);
                    if !state.interested.iter().any(|w| w.ptr_eq(&weak)) {
                        state.interested.push(weak);
                    }
                    waiter
                }
                None => return self.block(state, deadline),
            }
        };
        waiter.wait_for_future(cx, self, deadline)
    }

    /// Waits without a deadline and returns the value.
    ///
    /// Returns `None` only if the wait was cancelled by an executor shutdown.
    #[must_use]
    pub fn get(&self, cx: &ServeContext) -> Option<T> {
        if self.wait(cx, None).is_ready() {
            self.try_get()
        } else {
            None
        }
    }
}

impl<T> FutureProxy<T> {
    fn block(
        &self,
        mut state: parking_lot::MutexGuard<'_, ProxyState<T>>,
        deadline: Option<Instant>,
    ) -> WaitOutcome {
        while state.value.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut state, deadline).timed_out()
                        && state.value.is_none()
                    {
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.condvar.wait(&mut state),
            }
        }
        WaitOutcome::Resumed
    }
}

impl<T: Clone + Send> Default for FutureProxy<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> AwaitedFuture for FutureProxy<T> {
    fn id(&self) -> FutureId {
        self.id
    }

    fn is_available(&self) -> bool {
        self.state.lock().value.is_some()
    }

    fn block_until_available(&self, deadline: Option<Instant>) -> bool {
        self.block(self.state.lock(), deadline) != WaitOutcome::TimedOut
    }
}

impl<T> fmt::Debug for FutureProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FutureProxy")
            .field("id", &self.id)
            .field("available", &state.value.is_some())
            .field("interested", &state.interested.len())
            .finish()
    }
}
