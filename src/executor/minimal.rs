//! Unbounded executor: every request gets its own serving task.

use super::runnable::RunnableRequest;
use super::{RequestExecutor, RequestOwner, ServeContext};
use crate::error::SubmitError;
use crate::future::FutureWaiterRegistry;
use crate::runtime::{Job, WorkerPool, WorkerPoolOptions};
use crate::tracing_compat::{debug, warn};
use crate::types::{BodyId, RequestToken};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hands each submitted request straight to a serving thread.
///
/// There is no queue and no limit: `number_of_active` counts requests in
/// flight, and `number_of_ready` and `number_of_waiting` are always zero.
/// The executor does not register a
/// [`FutureWaiter`](crate::future::FutureWaiter), so futures touched from
/// `serve` block their thread directly. Method groups are not consulted.
pub struct MinimalRequestExecutor<O: RequestOwner> {
    body: BodyId,
    owner: Arc<O>,
    registry: Arc<FutureWaiterRegistry>,
    pool: WorkerPool,
    in_flight: Arc<AtomicUsize>,
    next_token: AtomicU64,
    shutdown: AtomicBool,
}

impl<O: RequestOwner> MinimalRequestExecutor<O> {
    /// Creates an executor whose serve contexts use the process-wide registry.
    #[must_use]
    pub fn new(body: BodyId, owner: Arc<O>) -> Self {
        Self::with_options(body, owner, WorkerPoolOptions::default(), FutureWaiterRegistry::global())
    }

    /// Creates an executor with custom pool options and registry.
    #[must_use]
    pub fn with_options(
        body: BodyId,
        owner: Arc<O>,
        options: WorkerPoolOptions,
        registry: Arc<FutureWaiterRegistry>,
    ) -> Self {
        debug!(body = %body, "minimal executor started");
        Self {
            body,
            owner,
            registry,
            pool: WorkerPool::with_options(options),
            in_flight: Arc::new(AtomicUsize::new(0)),
            next_token: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        }
    }

    /// The body this executor serves.
    #[must_use]
    pub fn body(&self) -> BodyId {
        self.body
    }

    /// Stops accepting submissions; requests in flight keep running.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!(
                body = %self.body,
                in_flight = self.in_flight.load(Ordering::Acquire),
                "minimal executor shutting down"
            );
        }
    }

    /// Shuts down and waits for the serving threads to exit.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        self.pool.shutdown_and_wait(timeout)
    }
}

impl<O: RequestOwner> RequestExecutor for MinimalRequestExecutor<O> {
    type Request = O::Request;

    fn submit(&self, request: O::Request) -> core::result::Result<(), SubmitError<O::Request>> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown(request));
        }
        let token = RequestToken::new(self.next_token.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(RunnableRequest::new(token, request));

        let body = self.body;
        let owner = Arc::clone(&self.owner);
        let registry = Arc::clone(&self.registry);
        let in_flight = Arc::clone(&self.in_flight);
        let job_slot = Arc::clone(&slot);
        let job: Job = Box::new(move |worker| {
            if let Some(mut request) = job_slot.take_request() {
                let cx = ServeContext::new(body, token, worker, registry);
                if catch_unwind(AssertUnwindSafe(|| owner.serve(&cx, &mut request))).is_err() {
                    warn!(body = %body, request = %token, "serve routine panicked");
                }
                if catch_unwind(AssertUnwindSafe(|| owner.finished(request))).is_err() {
                    warn!(body = %body, request = %token, "finished callback panicked");
                }
            }
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.pool.execute(job) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            warn!(body = %self.body, request = %token, error = %err, "request rejected");
            return match slot.take_request() {
                Some(request) => Err(SubmitError::Shutdown(request)),
                None => Ok(()),
            };
        }
        Ok(())
    }

    fn number_of_ready(&self) -> usize {
        0
    }

    fn number_of_active(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn number_of_waiting(&self) -> usize {
        0
    }
}

impl<O: RequestOwner> fmt::Debug for MinimalRequestExecutor<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinimalRequestExecutor")
            .field("body", &self.body)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .field("pool", &self.pool)
            .finish()
    }
}
