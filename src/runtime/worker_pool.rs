//! Cached pool of serving threads.
//!
//! Executors hand jobs to this pool instead of owning threads directly. The
//! pool itself enforces no limit: admission control happens before a job is
//! submitted, so the pool only has to make sure that every queued job gets a
//! thread promptly.
//!
//! # Thread Lifecycle
//!
//! A thread is spawned whenever queued jobs outnumber idle and released
//! threads. A job may [release](WorkerPool::release_current_thread) its
//! thread shortly before returning, so work queued in that window waits for
//! it instead of growing the pool. An idle thread that sees no work for
//! `idle_timeout` retires. Each thread receives a
//! [`WorkerId`] that stays the same for its whole life; jobs are told which
//! worker runs them, which is what executors use to account for threads.
//!
//! # Shutdown
//!
//! [`shutdown`](WorkerPool::shutdown) stops accepting jobs. Threads finish the
//! jobs already queued and then exit. Dropping the pool signals shutdown but
//! never blocks, because the last handle may be dropped from one of the
//! pool's own threads.

use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::WorkerId;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default idle timeout before a thread retires.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// A unit of work run on a pool thread.
pub type Job = Box<dyn FnOnce(WorkerId) + Send + 'static>;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
    static RELEASED: Cell<bool> = const { Cell::new(false) };
}

/// Configuration options for the worker pool.
#[derive(Clone)]
pub struct WorkerPoolOptions {
    /// Idle timeout before a thread retires.
    pub idle_timeout: Duration,
    /// Thread name prefix.
    pub thread_name_prefix: String,
    /// Callback when a thread starts.
    pub on_thread_start: Option<Arc<dyn Fn(WorkerId) + Send + Sync>>,
    /// Callback when a thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn(WorkerId) + Send + Sync>>,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "multiactive".to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for WorkerPoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolOptions")
            .field("idle_timeout", &self.idle_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

/// A cached thread pool that runs [`Job`]s.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: u64,
    state: Mutex<PoolState>,
    /// Signalled when work is queued or shutdown begins.
    work_ready: Condvar,
    /// Signalled when the last thread exits.
    all_exited: Condvar,
    next_worker: AtomicU64,
    options: WorkerPoolOptions,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    /// Threads alive (spawned and not yet exited).
    live: usize,
    /// Threads parked waiting for work.
    idle: usize,
    /// Threads running a job.
    busy: usize,
    /// Busy threads whose job is about to return.
    released: usize,
    shutdown: bool,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates an empty pool with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(WorkerPoolOptions::default())
    }

    /// Creates an empty pool with custom options.
    #[must_use]
    pub fn with_options(mut options: WorkerPoolOptions) -> Self {
        if options.idle_timeout.is_zero() {
            options.idle_timeout = DEFAULT_IDLE_TIMEOUT;
        }
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(PoolState::default()),
                work_ready: Condvar::new(),
                all_exited: Condvar::new(),
                next_worker: AtomicU64::new(1),
                options,
            }),
        }
    }

    /// Queues a job, spawning a thread if no idle thread can take it.
    ///
    /// Fails with [`ErrorKind::Shutdown`] after shutdown and with
    /// [`ErrorKind::SpawnFailed`] if a needed thread could not be created;
    /// in both cases the job is dropped without running.
    pub fn execute(&self, job: Job) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return Err(Error::new(ErrorKind::Shutdown).with_message("worker pool shut down"));
        }
        state.queue.push_back(job);
        if state.queue.len() <= state.idle + state.released {
            self.inner.work_ready.notify_one();
            return Ok(());
        }
        if let Err(err) = spawn_thread(&self.inner, &mut state) {
            state.queue.pop_back();
            drop(state);
            warn!(error = %err, "failed to spawn serving thread");
            return Err(err);
        }
        Ok(())
    }

    /// Marks the calling pool thread as about to finish its job.
    ///
    /// Jobs queued afterwards count on this thread instead of spawning a new
    /// one. Does nothing on foreign threads or when called twice.
    pub fn release_current_thread(&self) {
        if !self.on_worker_thread() || RELEASED.with(|r| r.replace(true)) {
            return;
        }
        self.inner.state.lock().released += 1;
    }

    /// Returns the number of queued jobs not yet picked up by a thread.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Returns the number of live threads.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.inner.state.lock().live
    }

    /// Returns the number of threads currently running a job.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.state.lock().busy
    }

    /// Returns the number of threads parked waiting for work.
    #[must_use]
    pub fn idle_threads(&self) -> usize {
        self.inner.state.lock().idle
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Returns true if the calling thread belongs to this pool.
    #[must_use]
    pub fn on_worker_thread(&self) -> bool {
        CURRENT_POOL.with(Cell::get) == self.inner.id
    }

    /// Initiates shutdown of the pool.
    ///
    /// No new jobs are accepted. Queued jobs still run.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            debug!(pool = self.inner.id, live = state.live, "worker pool shutting down");
        }
        self.inner.work_ready.notify_all();
    }

    /// Shuts down and waits for all threads to exit.
    ///
    /// Returns `true` if all threads exited before `timeout` elapsed. Called
    /// from one of the pool's own threads this can only time out.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;

        let handles = {
            let mut state = self.inner.state.lock();
            while state.live > 0 {
                if self
                    .inner
                    .all_exited
                    .wait_until(&mut state, deadline)
                    .timed_out()
                    && state.live > 0
                {
                    return false;
                }
            }
            std::mem::take(&mut state.handles)
        };

        for handle in handles {
            // Threads have already left the worker loop.
            let _ = handle.join();
        }
        true
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.id)
            .field("live", &state.live)
            .field("idle", &state.idle)
            .field("busy", &state.busy)
            .field("released", &state.released)
            .field("pending", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn spawn_thread(inner: &Arc<PoolInner>, state: &mut MutexGuard<'_, PoolState>) -> Result<()> {
    state.handles.retain(|h| !h.is_finished());

    let worker = WorkerId::new(inner.next_worker.fetch_add(1, Ordering::Relaxed));
    let name = format!("{}-worker-{}", inner.options.thread_name_prefix, worker.as_u64());
    let pool = Arc::clone(inner);

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            CURRENT_POOL.with(|c| c.set(pool.id));
            if let Some(ref callback) = pool.options.on_thread_start {
                callback(worker);
            }

            worker_loop(&pool, worker);

            if let Some(ref callback) = pool.options.on_thread_stop {
                callback(worker);
            }
            let mut state = pool.state.lock();
            state.live -= 1;
            if state.live == 0 {
                pool.all_exited.notify_all();
            }
        })
        .map_err(|e| Error::new(ErrorKind::SpawnFailed).with_source(e))?;

    state.live += 1;
    state.handles.push(handle);
    trace!(pool = inner.id, worker = %worker, live = state.live, "serving thread spawned");
    Ok(())
}

fn worker_loop(inner: &PoolInner, worker: WorkerId) {
    let mut state = inner.state.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            state.busy += 1;
            let outcome = MutexGuard::unlocked(&mut state, || {
                catch_unwind(AssertUnwindSafe(|| job(worker)))
            });
            state.busy -= 1;
            if RELEASED.with(|r| r.replace(false)) {
                state.released -= 1;
            }
            if outcome.is_err() {
                warn!(pool = inner.id, worker = %worker, "job panicked on serving thread");
            }
            continue;
        }

        if state.shutdown {
            break;
        }

        state.idle += 1;
        let timed_out = inner
            .work_ready
            .wait_for(&mut state, inner.options.idle_timeout)
            .timed_out();
        state.idle -= 1;

        if timed_out && state.queue.is_empty() && !state.shutdown {
            trace!(pool = inner.id, worker = %worker, "serving thread retiring after idle timeout");
            break;
        }
    }
}
