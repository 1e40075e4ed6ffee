#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use multiactive::executor::{RequestOwner, ServeContext};
use multiactive::future::{FutureProxy, FutureWaiterRegistry, WaitOutcome};
use multiactive::types::{MethodGroup, SessionTag, WorkerId};
use parking_lot::{Condvar, Mutex};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Once};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

/// Upper bound on any single wait in these tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const PROPTEST_SEED_ENV: &str = "MULTIACTIVE_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Installs the test subscriber; `MULTIACTIVE_TEST_LOG` overrides the filter.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_env("MULTIACTIVE_TEST_LOG")
            .unwrap_or_else(|_| EnvFilter::new("multiactive=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A fresh registry so tests never share waiters through the global one.
#[must_use]
pub fn private_registry() -> Arc<FutureWaiterRegistry> {
    Arc::new(FutureWaiterRegistry::new())
}

/// Polls `cond` until it holds, panicking after [`TEST_TIMEOUT`].
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// A scripted request: optionally waits on futures, then finishes.
#[derive(Debug, Clone)]
pub struct Job {
    /// Caller-chosen identity.
    pub id: u32,
    /// Session used by same-session hosting.
    pub session: Option<SessionTag>,
    /// Method group checked on admission.
    pub group: Option<MethodGroup>,
    /// Futures waited on in order.
    pub awaits: Vec<Arc<FutureProxy<u32>>>,
    /// Relative deadline applied to every wait.
    pub timeout: Option<Duration>,
    /// Panic inside `serve` after the waits.
    pub panics: bool,
}

impl Job {
    /// A request that does no waiting.
    #[must_use]
    pub fn plain(id: u32) -> Self {
        Self {
            id,
            session: None,
            group: None,
            awaits: Vec::new(),
            timeout: None,
            panics: false,
        }
    }

    /// A request that waits on `future`.
    #[must_use]
    pub fn awaiting(id: u32, future: &Arc<FutureProxy<u32>>) -> Self {
        Self {
            awaits: vec![Arc::clone(future)],
            ..Self::plain(id)
        }
    }

    /// Tags the request with a session.
    #[must_use]
    pub fn in_session(mut self, tag: &str) -> Self {
        self.session = Some(SessionTag::new(tag));
        self
    }

    /// Places the request in a method group.
    #[must_use]
    pub fn in_group(mut self, group: &MethodGroup) -> Self {
        self.group = Some(group.clone());
        self
    }

    /// Bounds each wait by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Makes `serve` panic.
    #[must_use]
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

#[derive(Debug, Default)]
struct Record {
    running: usize,
    max_running: usize,
    depth: HashMap<ThreadId, usize>,
    max_threads: usize,
    started: Vec<u32>,
    resumed: Vec<u32>,
    finished: Vec<u32>,
    outcomes: HashMap<u32, Vec<WaitOutcome>>,
    served_on: HashMap<u32, ThreadId>,
    workers: HashMap<u32, WorkerId>,
    /// Started and not yet finished, with their groups.
    in_flight: HashMap<u32, Option<MethodGroup>>,
    conflicts: Vec<(u32, u32)>,
    max_reported_active: usize,
}

impl Record {
    fn enter(&mut self) {
        self.running += 1;
        self.max_running = self.max_running.max(self.running);
    }

    fn leave(&mut self) {
        self.running -= 1;
    }
}

type ActiveSampler = Box<dyn Fn() -> Option<usize> + Send + Sync>;

/// An owner that records everything the executor does with its requests.
///
/// `running` counts requests inside `serve` and not parked on a future;
/// `threads` counts OS threads with at least one request on their stack.
#[derive(Default)]
pub struct Recorder {
    record: Mutex<Record>,
    changed: Condvar,
    sampler: Mutex<Option<ActiveSampler>>,
}

impl Recorder {
    /// Creates a shared recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of requests seen running at once.
    #[must_use]
    pub fn max_running(&self) -> usize {
        self.record.lock().max_running
    }

    /// Pairs of requests with incompatible groups that were in flight
    /// together.
    #[must_use]
    pub fn conflicts(&self) -> Vec<(u32, u32)> {
        self.record.lock().conflicts.clone()
    }

    /// Asks the executor for its active count each time a request starts
    /// or resumes. The sampler returns `None` once the executor is gone.
    pub fn sample_active_with(&self, sampler: impl Fn() -> Option<usize> + Send + Sync + 'static) {
        *self.sampler.lock() = Some(Box::new(sampler));
    }

    /// Highest active count the executor reported to the sampler.
    #[must_use]
    pub fn max_reported_active(&self) -> usize {
        self.record.lock().max_reported_active
    }

    fn sample_active(&self) {
        let reported = self.sampler.lock().as_ref().and_then(|sample| sample());
        if let Some(active) = reported {
            let mut record = self.record.lock();
            record.max_reported_active = record.max_reported_active.max(active);
        }
    }

    /// Highest number of serving threads seen at once.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.record.lock().max_threads
    }

    /// Ids in the order their `serve` started.
    #[must_use]
    pub fn started(&self) -> Vec<u32> {
        self.record.lock().started.clone()
    }

    /// Ids in the order their last wait returned.
    #[must_use]
    pub fn resumed(&self) -> Vec<u32> {
        self.record.lock().resumed.clone()
    }

    /// Ids in the order `finished` ran.
    #[must_use]
    pub fn finished(&self) -> Vec<u32> {
        self.record.lock().finished.clone()
    }

    /// Wait outcomes reported to request `id`.
    #[must_use]
    pub fn outcomes(&self, id: u32) -> Vec<WaitOutcome> {
        self.record
            .lock()
            .outcomes
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// OS thread that started serving `id`.
    #[must_use]
    pub fn thread_of(&self, id: u32) -> Option<ThreadId> {
        self.record.lock().served_on.get(&id).copied()
    }

    /// Worker reported by the serve context of `id`.
    #[must_use]
    pub fn worker_of(&self, id: u32) -> Option<WorkerId> {
        self.record.lock().workers.get(&id).copied()
    }

    /// Blocks until `count` requests finished, panicking after [`TEST_TIMEOUT`].
    pub fn wait_finished(&self, count: usize) {
        let deadline = Instant::now() + TEST_TIMEOUT;
        let mut record = self.record.lock();
        while record.finished.len() < count {
            assert!(
                !self.changed.wait_until(&mut record, deadline).timed_out()
                    || record.finished.len() >= count,
                "timed out waiting for {count} finished requests, saw {:?}",
                record.finished
            );
        }
    }

    /// Blocks until request `id` started, panicking after [`TEST_TIMEOUT`].
    pub fn wait_started(&self, id: u32) {
        let deadline = Instant::now() + TEST_TIMEOUT;
        let mut record = self.record.lock();
        while !record.started.contains(&id) {
            assert!(
                !self.changed.wait_until(&mut record, deadline).timed_out()
                    || record.started.contains(&id),
                "timed out waiting for request {id} to start"
            );
        }
    }

    fn thread_enter(&self, record: &mut Record) {
        let depth = record.depth.entry(thread::current().id()).or_insert(0);
        *depth += 1;
        let threads = record.depth.values().filter(|d| **d > 0).count();
        record.max_threads = record.max_threads.max(threads);
    }

    fn thread_leave(&self, record: &mut Record) {
        if let Some(depth) = record.depth.get_mut(&thread::current().id()) {
            *depth -= 1;
        }
    }
}

impl RequestOwner for Recorder {
    type Request = Job;

    fn serve(&self, cx: &ServeContext, job: &mut Job) {
        {
            let mut record = self.record.lock();
            record.enter();
            self.thread_enter(&mut record);
            record.started.push(job.id);
            record.served_on.insert(job.id, thread::current().id());
            record.workers.insert(job.id, cx.worker());
            let clashes: Vec<(u32, u32)> = record
                .in_flight
                .iter()
                .filter(|(_, other)| match (&job.group, other) {
                    (Some(a), Some(b)) => !a.is_compatible(b),
                    _ => false,
                })
                .map(|(other_id, _)| (*other_id, job.id))
                .collect();
            record.conflicts.extend(clashes);
            record.in_flight.insert(job.id, job.group.clone());
            self.changed.notify_all();
        }
        self.sample_active();

        for future in &job.awaits {
            self.record.lock().leave();
            let deadline = job.timeout.map(|t| Instant::now() + t);
            let outcome = future.wait(cx, deadline);
            let mut record = self.record.lock();
            record.enter();
            record.resumed.push(job.id);
            record.outcomes.entry(job.id).or_default().push(outcome);
            self.changed.notify_all();
            drop(record);
            self.sample_active();
        }

        if job.panics {
            self.record.lock().leave();
            panic!("request {} failed on purpose", job.id);
        }
        self.record.lock().leave();
    }

    fn finished(&self, job: Job) {
        let mut record = self.record.lock();
        // Runs on the serving thread, so this closes the `serve` entry.
        self.thread_leave(&mut record);
        record.in_flight.remove(&job.id);
        record.finished.push(job.id);
        self.changed.notify_all();
    }

    fn session_tag(&self, job: &Job) -> Option<SessionTag> {
        job.session.clone()
    }

    fn method_group(&self, job: &Job) -> Option<MethodGroup> {
        job.group.clone()
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}
