//! Per-request serving context.

use crate::future::{AwaitedFuture, FutureWaiterRegistry, WaitOutcome};
use crate::types::{BodyId, RequestToken, WorkerId};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Identifies the request a serve routine is running and where it runs.
///
/// Executors build one per serve call and pass it to
/// [`RequestOwner::serve`](super::RequestOwner::serve). Futures use it to
/// find the body's [`FutureWaiter`](crate::future::FutureWaiter) and to tell
/// that waiter which request is about to block.
#[derive(Clone)]
pub struct ServeContext {
    body: BodyId,
    token: RequestToken,
    worker: WorkerId,
    registry: Arc<FutureWaiterRegistry>,
}

impl ServeContext {
    /// Creates a context for `token` of `body` running on `worker`.
    #[must_use]
    pub fn new(
        body: BodyId,
        token: RequestToken,
        worker: WorkerId,
        registry: Arc<FutureWaiterRegistry>,
    ) -> Self {
        Self {
            body,
            token,
            worker,
            registry,
        }
    }

    /// The body whose request is being served.
    #[must_use]
    pub const fn body(&self) -> BodyId {
        self.body
    }

    /// The request being served.
    #[must_use]
    pub const fn token(&self) -> RequestToken {
        self.token
    }

    /// The thread the request runs on.
    ///
    /// A hosted request reports its host's worker.
    #[must_use]
    pub const fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The registry futures consult to find this body's waiter.
    #[must_use]
    pub fn registry(&self) -> &Arc<FutureWaiterRegistry> {
        &self.registry
    }

    /// Waits for an arbitrary [`AwaitedFuture`] through the body's waiter.
    ///
    /// Returns [`WaitOutcome::Available`] at once if the future is already
    /// available. Without a registered waiter the caller's thread blocks in
    /// [`AwaitedFuture::block_until_available`].
    pub fn wait_for(&self, future: &dyn AwaitedFuture, deadline: Option<Instant>) -> WaitOutcome {
        if future.is_available() {
            return WaitOutcome::Available;
        }
        if let Some(waiter) = self.registry.lookup(self.body) {
            return waiter.wait_for_future(self, future, deadline);
        }
        if future.block_until_available(deadline) {
            WaitOutcome::Resumed
        } else {
            WaitOutcome::TimedOut
        }
    }
}

impl fmt::Debug for ServeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeContext")
            .field("body", &self.body)
            .field("token", &self.token)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
