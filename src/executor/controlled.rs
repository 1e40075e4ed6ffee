//! Bounded-concurrency executor with wait-by-necessity.
//!
//! # Architecture
//!
//! ```text
//!  submit ──► SchedulerState ◄── serve_started / serve_stopped / park
//!                  │                       ▲
//!            (wakeup condvar)              │
//!                  ▼                       │
//!            coordinator ── Dispatch ──► WorkerPool ──► run_request
//!                  │
//!                  ├── Resume ──► RunnableRequest (parked thread)
//!                  └── Host   ──► RunnableRequest (parked host runs parasite)
//! ```
//!
//! All bookkeeping lives in one [`SchedulerState`] behind one lock. Event
//! sources (submitters, serving threads, future resolvers) only record what
//! happened and wake the coordinator thread; the coordinator alone turns
//! the state into [`Decision`]s and carries them out.
//!
//! # Lock Order
//!
//! The scheduler lock is taken before any per-request park lock, before the
//! worker pool's lock, and before a future's own lock (`is_available` is
//! checked under the scheduler lock).
//! Futures must report arrivals after releasing their own lock.

use super::config::{ExecutorConfig, HostingPolicy, Limits};
use super::runnable::RunnableRequest;
use super::state::{violation, Decision, Detach, ExecutorSnapshot, SchedulerState};
use super::{RequestExecutor, RequestOwner, ServeContext, ServingController};
use crate::error::{ConfigError, Error, ErrorKind, Result, SubmitError};
use crate::future::{AwaitedFuture, FutureWaiter, FutureWaiterRegistry, WaitOutcome};
use crate::runtime::{Job, WorkerPool, WorkerPoolOptions};
use crate::tracing_compat::{debug, error, trace, warn};
use crate::types::{BodyId, FutureId, RequestToken, WorkerId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Delay before the coordinator retries a dispatch whose thread could not be
/// spawned.
const DISPATCH_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Serves a body's requests under an active limit, lending blocked threads
/// to ready requests when the thread budget is exhausted.
///
/// Registered as the body's [`FutureWaiter`] for its whole life, so futures
/// touched from inside `serve` park the request here instead of blocking
/// the thread blindly.
pub struct ControlledRequestExecutor<O: RequestOwner> {
    shared: Arc<Shared<O>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<O: RequestOwner> {
    body: BodyId,
    owner: Arc<O>,
    registry: Arc<FutureWaiterRegistry>,
    pool: WorkerPool,
    shutdown_timeout: Duration,
    inner: Mutex<Inner<O::Request>>,
    /// Wakes the coordinator.
    wakeup: Condvar,
    /// Signals observers of the coordinator exiting.
    changed: Condvar,
    next_token: AtomicU64,
}

struct Inner<R> {
    sched: SchedulerState,
    slots: HashMap<RequestToken, Arc<RunnableRequest<R>>>,
    coordinator_running: bool,
}

impl<O: RequestOwner> ControlledRequestExecutor<O> {
    /// Creates an executor registered in the process-wide registry.
    pub fn new(body: BodyId, owner: Arc<O>, config: ExecutorConfig) -> Result<Self> {
        Self::with_registry(body, owner, config, FutureWaiterRegistry::global())
    }

    /// Creates an executor registered in `registry`.
    pub fn with_registry(
        body: BodyId,
        owner: Arc<O>,
        mut config: ExecutorConfig,
        registry: Arc<FutureWaiterRegistry>,
    ) -> Result<Self> {
        config.normalize();
        let pool = WorkerPool::with_options(WorkerPoolOptions {
            idle_timeout: config.idle_timeout,
            thread_name_prefix: format!("{}-{}", config.thread_name_prefix, body.as_u64()),
            ..WorkerPoolOptions::default()
        });

        let shared = Arc::new(Shared {
            body,
            owner,
            registry,
            pool,
            shutdown_timeout: config.shutdown_timeout,
            inner: Mutex::new(Inner {
                sched: SchedulerState::new(config.limits()),
                slots: HashMap::new(),
                coordinator_running: true,
            }),
            wakeup: Condvar::new(),
            changed: Condvar::new(),
            next_token: AtomicU64::new(1),
        });

        let coordinator_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!(
                "{}-coordinator-{}",
                config.thread_name_prefix,
                body.as_u64()
            ))
            .spawn(move || coordinator_loop(&coordinator_shared))
            .map_err(|e| {
                Error::new(ErrorKind::SpawnFailed)
                    .with_message("coordinator thread")
                    .with_source(e)
            })?;

        let waiter: Arc<dyn FutureWaiter> = shared.clone();
        if shared.registry.register(body, &waiter) {
            warn!(body = %body, "replaced a live future waiter for body");
        }

        debug!(
            body = %body,
            active_limit = config.active_limit,
            hard_limit = config.hard_limit,
            hosting = %config.hosting,
            "controlled executor started"
        );

        Ok(Self {
            shared,
            coordinator: Mutex::new(Some(handle)),
        })
    }

    /// The body this executor serves.
    #[must_use]
    pub fn body(&self) -> BodyId {
        self.shared.body
    }

    /// Current admission limits.
    #[must_use]
    pub fn limits(&self) -> Limits {
        self.shared.inner.lock().sched.limits()
    }

    /// Point-in-time view of the scheduler's sets.
    #[must_use]
    pub fn snapshot(&self) -> ExecutorSnapshot {
        self.shared.inner.lock().sched.snapshot()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.inner.lock().sched.is_shut_down()
    }

    /// Stops accepting submissions.
    ///
    /// Queued requests are still served. Requests parked on a future are
    /// released with [`WaitOutcome::Cancelled`], and later waits return
    /// `Cancelled` unless the future is already available.
    pub fn shutdown(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.sched.is_shut_down() {
            return;
        }
        let cancelled = inner.sched.begin_shutdown();
        debug!(
            body = %self.shared.body,
            ready = inner.sched.number_of_ready(),
            active = inner.sched.number_of_active(),
            cancelled,
            "controlled executor shutting down"
        );
        self.shared.wakeup.notify_one();
    }

    /// Shuts down and waits until every request finished, the coordinator
    /// stopped and the serving threads exited.
    ///
    /// Returns `false` if `timeout` elapsed first. Called from inside a serve
    /// routine of this executor this can only time out.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;

        {
            let mut inner = self.shared.inner.lock();
            while inner.coordinator_running {
                if self
                    .shared
                    .changed
                    .wait_until(&mut inner, deadline)
                    .timed_out()
                    && inner.coordinator_running
                {
                    warn!(
                        body = %self.shared.body,
                        snapshot = ?inner.sched.snapshot(),
                        "shutdown timed out with requests outstanding"
                    );
                    return false;
                }
            }
        }

        if let Some(handle) = self.coordinator.lock().take() {
            // The coordinator has left its loop.
            let _ = handle.join();
        }
        self.unregister();

        let remaining = deadline.saturating_duration_since(Instant::now());
        let joined = self.shared.pool.shutdown_and_wait(remaining);
        debug!(body = %self.shared.body, joined, "controlled executor shut down");
        joined
    }

    fn unregister(&self) {
        let ours = self
            .shared
            .registry
            .lookup(self.shared.body)
            .is_some_and(|w| Arc::as_ptr(&w).cast::<()>() == Arc::as_ptr(&self.shared).cast::<()>());
        if ours {
            self.shared.registry.unregister(self.shared.body);
        }
    }
}

impl<O: RequestOwner> Shared<O> {
    /// Runs one request on `worker`, including its `finished` callback.
    ///
    /// A dispatched request releases its pool thread together with its
    /// scheduler slot, so the request admitted next reuses the thread. A
    /// hosted one does not: its thread goes back to the host.
    fn run_request(&self, slot: Arc<RunnableRequest<O::Request>>, worker: WorkerId, hosted: bool) {
        let token = slot.token();
        self.inner.lock().sched.serve_started(token, worker);

        let Some(mut request) = slot.take_request() else {
            violation("request served twice", token);
        };
        let cx = ServeContext::new(self.body, token, worker, Arc::clone(&self.registry));

        if catch_unwind(AssertUnwindSafe(|| self.owner.serve(&cx, &mut request))).is_err() {
            warn!(body = %self.body, request = %token, worker = %worker, "serve routine panicked");
        }
        if catch_unwind(AssertUnwindSafe(|| self.owner.finished(request))).is_err() {
            warn!(body = %self.body, request = %token, "finished callback panicked");
        }

        let mut inner = self.inner.lock();
        inner.sched.serve_stopped(token, worker);
        inner.slots.remove(&token);
        if !hosted {
            self.pool.release_current_thread();
        }
        self.wakeup.notify_one();
    }

    fn expire(&self, token: RequestToken) {
        let mut inner = self.inner.lock();
        if inner.sched.detach(token, Detach::TimedOut) {
            warn!(body = %self.body, request = %token, "wait for future timed out");
            self.wakeup.notify_one();
        }
    }

    fn update_limits(&self, update: impl FnOnce(Limits) -> Limits) -> Limits {
        let mut inner = self.inner.lock();
        let limits = update(inner.sched.limits());
        if limits != inner.sched.limits() {
            inner.sched.set_limits(limits);
            debug!(
                body = %self.body,
                active_limit = limits.active_limit,
                hard_limit = limits.hard_limit,
                hosting = %limits.hosting,
                "executor reconfigured"
            );
            self.wakeup.notify_one();
        }
        limits
    }
}

fn coordinator_loop<O: RequestOwner>(shared: &Arc<Shared<O>>) {
    trace!(body = %shared.body, "coordinator started");
    let mut inner = shared.inner.lock();
    loop {
        let decisions = inner.sched.schedule();
        let progressed = !decisions.is_empty();
        let mut dispatch_failed = false;

        for decision in decisions {
            match decision {
                Decision::Resume { token, outcome } => match inner.slots.get(&token) {
                    Some(slot) => slot.resume(outcome),
                    None => violation("resumed request has no slot", token),
                },
                Decision::Dispatch(token) => {
                    let Some(slot) = inner.slots.get(&token).cloned() else {
                        violation("dispatched request has no slot", token);
                    };
                    let job_shared = Arc::clone(shared);
                    let job: Job = Box::new(move |worker| job_shared.run_request(slot, worker, false));
                    if let Err(err) = shared.pool.execute(job) {
                        warn!(
                            body = %shared.body,
                            request = %token,
                            error = %err,
                            "dispatch failed, request re-queued"
                        );
                        inner.sched.abort_dispatch(token);
                        dispatch_failed = true;
                    }
                }
                Decision::Host { host, parasite } => {
                    let (Some(host_slot), Some(parasite_slot)) =
                        (inner.slots.get(&host), inner.slots.get(&parasite))
                    else {
                        violation("hosting decision without slots", parasite);
                    };
                    host_slot.lend(Arc::clone(parasite_slot));
                }
            }
        }

        if cfg!(debug_assertions) {
            if let Err(broken) = inner.sched.check_invariants() {
                error!(body = %shared.body, broken = %broken, "scheduler state inconsistent");
                panic!("scheduler state inconsistent: {broken}");
            }
        }

        if progressed {
            debug!(
                body = %shared.body,
                ready = inner.sched.number_of_ready(),
                active = inner.sched.number_of_active(),
                waiting = inner.sched.number_of_waiting(),
                "coordinator made progress"
            );
        }

        if dispatch_failed {
            shared.wakeup.wait_for(&mut inner, DISPATCH_RETRY_DELAY);
            continue;
        }
        if inner.sched.is_shut_down() && inner.sched.is_idle() {
            break;
        }
        if !progressed {
            shared.wakeup.wait(&mut inner);
        }
    }
    inner.coordinator_running = false;
    shared.changed.notify_all();
    trace!(body = %shared.body, "coordinator stopped");
}

impl<O: RequestOwner> FutureWaiter for Shared<O> {
    fn wait_for_future(
        &self,
        cx: &ServeContext,
        future: &dyn AwaitedFuture,
        deadline: Option<Instant>,
    ) -> WaitOutcome {
        let token = cx.token();
        let slot = {
            let mut inner = self.inner.lock();
            if future.is_available() {
                return WaitOutcome::Available;
            }
            if inner.sched.is_shut_down() {
                return WaitOutcome::Cancelled;
            }
            if cx.body() != self.body {
                violation("wait delegated to the executor of another body", token);
            }
            let Some(slot) = inner.slots.get(&token).cloned() else {
                violation("wait from a request this executor is not serving", token);
            };
            inner.sched.park(token, future.id());
            self.wakeup.notify_one();
            slot
        };

        let worker = cx.worker();
        slot.block_until_resumed(
            deadline,
            |parasite| self.run_request(parasite, worker, true),
            || self.expire(token),
        )
    }

    fn future_arrived(&self, future: FutureId) {
        let mut inner = self.inner.lock();
        if inner.sched.future_arrived(future) {
            self.wakeup.notify_one();
        }
    }
}

impl<O: RequestOwner> FutureWaiter for ControlledRequestExecutor<O> {
    fn wait_for_future(
        &self,
        cx: &ServeContext,
        future: &dyn AwaitedFuture,
        deadline: Option<Instant>,
    ) -> WaitOutcome {
        self.shared.wait_for_future(cx, future, deadline)
    }

    fn future_arrived(&self, future: FutureId) {
        self.shared.future_arrived(future);
    }
}

impl<O: RequestOwner> RequestExecutor for ControlledRequestExecutor<O> {
    type Request = O::Request;

    fn submit(&self, request: O::Request) -> core::result::Result<(), SubmitError<O::Request>> {
        let session = self.shared.owner.session_tag(&request);
        let group = self.shared.owner.method_group(&request);
        let mut inner = self.shared.inner.lock();
        if inner.sched.is_shut_down() {
            return Err(SubmitError::Shutdown(request));
        }
        let token = RequestToken::new(self.shared.next_token.fetch_add(1, Ordering::Relaxed));
        inner
            .slots
            .insert(token, Arc::new(RunnableRequest::new(token, request)));
        inner.sched.submit(token, session, group);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn number_of_ready(&self) -> usize {
        self.shared.inner.lock().sched.number_of_ready()
    }

    fn number_of_active(&self) -> usize {
        self.shared.inner.lock().sched.number_of_active()
    }

    fn number_of_waiting(&self) -> usize {
        self.shared.inner.lock().sched.number_of_waiting()
    }
}

impl<O: RequestOwner> ServingController for ControlledRequestExecutor<O> {
    fn concurrency_limit(&self) -> usize {
        self.limits().active_limit
    }

    fn set_concurrency_limit(&self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(zero_limit());
        }
        self.shared.update_limits(|l| Limits {
            active_limit: limit,
            ..l
        });
        Ok(())
    }

    fn increment_concurrency(&self, by: usize) -> usize {
        self.shared
            .update_limits(|l| Limits {
                active_limit: l.active_limit.saturating_add(by),
                ..l
            })
            .active_limit
    }

    fn decrement_concurrency(&self, by: usize) -> usize {
        self.shared
            .update_limits(|l| {
                if l.active_limit > by {
                    Limits {
                        active_limit: l.active_limit - by,
                        ..l
                    }
                } else {
                    l
                }
            })
            .active_limit
    }

    fn configure(&self, active_limit: usize, hard_limit: bool, hosting: HostingPolicy) -> Result<()> {
        if active_limit == 0 {
            return Err(zero_limit());
        }
        self.shared.update_limits(|_| Limits {
            active_limit,
            hard_limit,
            hosting,
        });
        Ok(())
    }
}

fn zero_limit() -> Error {
    ConfigError::InvalidLimit {
        name: "active_limit",
        reason: "must be at least 1".to_string(),
    }
    .into()
}

impl<O: RequestOwner> Drop for ControlledRequestExecutor<O> {
    fn drop(&mut self) {
        if self.shared.pool.on_worker_thread() {
            // Waiting here would wait for this very thread.
            self.shutdown();
            self.unregister();
            return;
        }
        if !self.shutdown_and_wait(self.shared.shutdown_timeout) {
            warn!(body = %self.shared.body, "executor dropped before its requests drained");
        }
    }
}

impl<O: RequestOwner> fmt::Debug for ControlledRequestExecutor<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("ControlledRequestExecutor")
            .field("body", &self.shared.body)
            .field("limits", &inner.sched.limits())
            .field("snapshot", &inner.sched.snapshot())
            .field("shutdown", &inner.sched.is_shut_down())
            .finish()
    }
}
