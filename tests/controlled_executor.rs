//! Controlled executor end-to-end tests.
//!
//! Covers:
//!   - hosting liveness under a hard limit of one
//!   - admission bounds with and without the hard limit
//!   - resume order, shared futures and repeated arrivals
//!   - timed-out and cancelled waits
//!   - same-session hosting and nested hosting
//!   - method group admission
//!   - runtime limit adjustment, panics and shutdown

#[macro_use]
mod common;

use common::{init_test_logging, private_registry, wait_until, Job, Recorder, TEST_TIMEOUT};

use multiactive::executor::{
    ControlledRequestExecutor, ExecutorBuilder, HostingPolicy, RequestExecutor, ServingController,
};
use multiactive::future::{AwaitedFuture, FutureProxy, FutureWaiter, WaitOutcome};
use multiactive::types::{BodyId, MethodGroup};
use multiactive::SubmitError;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn controlled(
    limit: usize,
    hard: bool,
    hosting: HostingPolicy,
) -> (ControlledRequestExecutor<Recorder>, Arc<Recorder>) {
    let recorder = Recorder::new();
    let executor = ExecutorBuilder::new()
        .active_limit(limit)
        .hard_limit(hard)
        .hosting_policy(hosting)
        .thread_name_prefix("it")
        .registry(private_registry())
        .build(Arc::clone(&recorder), BodyId::next())
        .expect("build executor");
    (executor, recorder)
}

fn future() -> Arc<FutureProxy<u32>> {
    Arc::new(FutureProxy::new())
}

#[test]
fn blocked_request_hosts_independent_work_under_hard_limit() {
    init_test("blocked_request_hosts_independent_work_under_hard_limit");
    let (executor, recorder) = controlled(1, true, HostingPolicy::Fifo);
    let f = future();

    executor.submit(Job::awaiting(1, &f)).unwrap();
    executor.submit(Job::plain(2)).unwrap();

    test_section!("second request completes before the future arrives");
    recorder.wait_finished(1);
    assert_eq!(recorder.finished(), vec![2]);
    assert_eq!(recorder.thread_of(2), recorder.thread_of(1));
    assert_eq!(recorder.worker_of(2), recorder.worker_of(1));
    assert_eq!(executor.number_of_waiting(), 1);

    test_section!("host resumes after arrival");
    assert!(f.resolve(10));
    recorder.wait_finished(2);
    assert_eq!(recorder.finished(), vec![2, 1]);
    assert_eq!(recorder.outcomes(1), vec![WaitOutcome::Resumed]);
    assert_eq!(recorder.max_threads(), 1);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("blocked_request_hosts_independent_work_under_hard_limit");
}

#[test]
fn soft_limit_bounds_running_requests() {
    init_test("soft_limit_bounds_running_requests");
    let (executor, recorder) = controlled(2, false, HostingPolicy::Fifo);
    let gate = future();
    for id in 0..3 {
        executor.submit(Job::awaiting(id, &gate)).unwrap();
    }

    // Parked requests free their slot, so all three get to park.
    wait_until("three parked requests", || executor.number_of_waiting() == 3);
    assert_eq!(executor.number_of_ready(), 0);

    gate.resolve(1);
    recorder.wait_finished(3);
    let mut finished = recorder.finished();
    finished.sort_unstable();
    assert_eq!(finished, vec![0, 1, 2]);
    assert!(recorder.max_running() <= 2, "max running {}", recorder.max_running());

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    assert_eq!(executor.number_of_active(), 0);
    test_complete!("soft_limit_bounds_running_requests");
}

#[test]
fn independent_requests_each_finish_once() {
    init_test("independent_requests_each_finish_once");
    let (executor, recorder) = controlled(2, false, HostingPolicy::Fifo);
    let executor = Arc::new(executor);
    let observed = Arc::downgrade(&executor);
    recorder.sample_active_with(move || observed.upgrade().map(|e| e.number_of_active()));

    for id in 0..3 {
        executor.submit(Job::plain(id)).unwrap();
    }
    recorder.wait_finished(3);
    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));

    let mut finished = recorder.finished();
    finished.sort_unstable();
    assert_eq!(finished, vec![0, 1, 2]);
    assert!(recorder.max_running() <= 2);
    let reported = recorder.max_reported_active();
    assert!((1..=2).contains(&reported), "executor reported {reported} active");
    test_complete!("independent_requests_each_finish_once");
}

#[test]
fn incompatible_requests_never_overlap() {
    init_test("incompatible_requests_never_overlap");
    let (executor, recorder) = controlled(2, false, HostingPolicy::Fifo);
    let write = MethodGroup::new("write", false);
    let read = MethodGroup::new("read", true);
    let gate = future();

    executor.submit(Job::awaiting(1, &gate).in_group(&write)).unwrap();
    recorder.wait_started(1);
    executor.submit(Job::plain(2).in_group(&write)).unwrap();
    executor.submit(Job::plain(3).in_group(&read)).unwrap();
    executor.submit(Job::plain(4)).unwrap();

    test_section!("only the ungrouped request passes the parked writer");
    recorder.wait_finished(1);
    assert_eq!(recorder.finished(), vec![4]);
    wait_until("writer parked", || executor.number_of_waiting() == 1);
    assert_eq!(executor.number_of_ready(), 2);

    test_section!("the queue drains in order once the writer finishes");
    gate.resolve(1);
    recorder.wait_finished(4);
    assert_eq!(recorder.finished(), vec![4, 1, 2, 3]);
    assert!(recorder.conflicts().is_empty(), "{:?}", recorder.conflicts());

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("incompatible_requests_never_overlap");
}

#[test]
fn self_compatible_group_runs_in_parallel() {
    init_test("self_compatible_group_runs_in_parallel");
    let (executor, recorder) = controlled(2, false, HostingPolicy::Fifo);
    let read = MethodGroup::new("read", true);
    let gate = future();

    executor.submit(Job::awaiting(1, &gate).in_group(&read)).unwrap();
    executor.submit(Job::awaiting(2, &gate).in_group(&read)).unwrap();
    wait_until("both readers parked", || executor.number_of_waiting() == 2);

    gate.resolve(1);
    recorder.wait_finished(2);
    assert!(recorder.conflicts().is_empty());
    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("self_compatible_group_runs_in_parallel");
}

#[test]
fn arrived_waiters_resume_oldest_first() {
    init_test("arrived_waiters_resume_oldest_first");
    let (executor, recorder) = controlled(1, false, HostingPolicy::Fifo);
    let f = future();
    for id in 0..3 {
        executor.submit(Job::awaiting(id, &f)).unwrap();
    }
    wait_until("three parked requests", || executor.number_of_waiting() == 3);
    assert_eq!(recorder.started(), vec![0, 1, 2]);

    f.resolve(5);
    recorder.wait_finished(3);
    assert_eq!(recorder.resumed(), vec![0, 1, 2]);
    for id in 0..3 {
        assert_eq!(recorder.outcomes(id), vec![WaitOutcome::Resumed]);
    }
    assert_eq!(recorder.max_running(), 1);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("arrived_waiters_resume_oldest_first");
}

#[test]
fn available_future_never_parks() {
    init_test("available_future_never_parks");
    let (executor, recorder) = controlled(1, true, HostingPolicy::Fifo);
    let f = future();
    f.resolve(3);

    executor.submit(Job::awaiting(1, &f)).unwrap();
    recorder.wait_finished(1);
    assert_eq!(recorder.outcomes(1), vec![WaitOutcome::Available]);
    assert_eq!(executor.snapshot().waiting, 0);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("available_future_never_parks");
}

#[test]
fn repeated_arrival_is_harmless() {
    init_test("repeated_arrival_is_harmless");
    let (executor, recorder) = controlled(1, true, HostingPolicy::Fifo);
    let f = future();

    // Nobody waits yet.
    executor.future_arrived(f.id());
    assert_eq!(executor.snapshot().arrived, 0);

    executor.submit(Job::awaiting(1, &f)).unwrap();
    wait_until("parked request", || executor.number_of_waiting() == 1);
    assert!(f.resolve(1));
    assert!(!f.resolve(2));
    executor.future_arrived(f.id());
    recorder.wait_finished(1);

    executor.future_arrived(f.id());
    let snapshot = executor.snapshot();
    assert_eq!(snapshot.arrived, 0);
    assert_eq!(snapshot.waiting, 0);
    assert_eq!(recorder.outcomes(1), vec![WaitOutcome::Resumed]);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("repeated_arrival_is_harmless");
}

#[test]
fn wait_times_out_and_late_arrival_is_ignored() {
    init_test("wait_times_out_and_late_arrival_is_ignored");
    let (executor, recorder) = controlled(1, true, HostingPolicy::Fifo);
    let f = future();

    executor
        .submit(Job::awaiting(1, &f).with_timeout(Duration::from_millis(30)))
        .unwrap();
    recorder.wait_finished(1);
    assert_eq!(recorder.outcomes(1), vec![WaitOutcome::TimedOut]);

    f.resolve(9);
    let snapshot = executor.snapshot();
    assert_eq!(snapshot.waiting, 0);
    assert_eq!(snapshot.arrived, 0);

    // The executor keeps serving after a timeout.
    executor.submit(Job::plain(2)).unwrap();
    recorder.wait_finished(2);
    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("wait_times_out_and_late_arrival_is_ignored");
}

#[test]
fn shutdown_cancels_parked_requests() {
    init_test("shutdown_cancels_parked_requests");
    let (executor, recorder) = controlled(2, true, HostingPolicy::Fifo);
    let never = future();

    executor.submit(Job::awaiting(1, &never)).unwrap();
    wait_until("parked request", || executor.number_of_waiting() == 1);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    assert_eq!(recorder.finished(), vec![1]);
    assert_eq!(recorder.outcomes(1), vec![WaitOutcome::Cancelled]);

    match executor.submit(Job::plain(2)) {
        Err(SubmitError::Shutdown(job)) => assert_eq!(job.id, 2),
        Ok(()) => panic!("submit accepted after shutdown"),
    }
    test_complete!("shutdown_cancels_parked_requests");
}

#[test]
fn shutdown_drains_queued_requests() {
    init_test("shutdown_drains_queued_requests");
    let (executor, recorder) = controlled(1, true, HostingPolicy::Fifo);
    for id in 0..5 {
        executor.submit(Job::plain(id)).unwrap();
    }
    executor.shutdown();
    assert!(executor.is_shutdown());
    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    assert_eq!(recorder.finished().len(), 5);
    test_complete!("shutdown_drains_queued_requests");
}

#[test]
fn drop_waits_for_outstanding_requests() {
    init_test("drop_waits_for_outstanding_requests");
    let recorder = Recorder::new();
    {
        let executor = ExecutorBuilder::new()
            .active_limit(2)
            .shutdown_timeout(TEST_TIMEOUT)
            .registry(private_registry())
            .build(Arc::clone(&recorder), BodyId::next())
            .unwrap();
        for id in 0..4 {
            executor.submit(Job::plain(id)).unwrap();
        }
    }
    assert_eq!(recorder.finished().len(), 4);
    test_complete!("drop_waits_for_outstanding_requests");
}

#[test]
fn same_session_hosting_skips_foreign_sessions() {
    init_test("same_session_hosting_skips_foreign_sessions");
    let (executor, recorder) = controlled(1, true, HostingPolicy::SameSession);
    let f = future();

    executor.submit(Job::awaiting(1, &f).in_session("s1")).unwrap();
    executor.submit(Job::plain(2).in_session("s2")).unwrap();
    executor.submit(Job::plain(3).in_session("s1")).unwrap();

    test_section!("only the matching session is hosted");
    recorder.wait_finished(1);
    assert_eq!(recorder.finished(), vec![3]);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.finished(), vec![3]);
    assert_eq!(executor.number_of_ready(), 1);

    test_section!("foreign session runs after the host finishes");
    f.resolve(1);
    recorder.wait_finished(3);
    assert_eq!(recorder.finished(), vec![3, 1, 2]);
    assert_eq!(recorder.max_threads(), 1);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("same_session_hosting_skips_foreign_sessions");
}

#[test]
fn host_waits_for_its_parasite() {
    init_test("host_waits_for_its_parasite");
    let (executor, recorder) = controlled(1, true, HostingPolicy::Fifo);
    let f = future();
    let g = future();

    executor.submit(Job::awaiting(1, &f)).unwrap();
    executor.submit(Job::awaiting(2, &g)).unwrap();
    wait_until("host and parked parasite", || executor.number_of_waiting() == 2);

    test_section!("the parked parasite hosts the next request");
    executor.submit(Job::plain(3)).unwrap();
    recorder.wait_finished(1);
    assert_eq!(recorder.finished(), vec![3]);
    assert_eq!(recorder.thread_of(3), recorder.thread_of(1));

    test_section!("host stays parked while its parasite waits");
    f.resolve(1);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.finished(), vec![3]);
    assert_eq!(executor.number_of_waiting(), 2);

    g.resolve(2);
    recorder.wait_finished(3);
    assert_eq!(recorder.finished(), vec![3, 2, 1]);
    assert_eq!(recorder.max_threads(), 1);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("host_waits_for_its_parasite");
}

#[test]
fn raising_the_limit_admits_queued_work() {
    init_test("raising_the_limit_admits_queued_work");
    let (executor, recorder) = controlled(1, true, HostingPolicy::SameSession);
    let f = future();

    executor.submit(Job::awaiting(1, &f).in_session("a")).unwrap();
    executor.submit(Job::plain(2).in_session("b")).unwrap();
    wait_until("parked host", || executor.number_of_waiting() == 1);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(executor.number_of_ready(), 1);

    assert_eq!(executor.increment_concurrency(1), 2);
    recorder.wait_finished(1);
    assert_eq!(recorder.finished(), vec![2]);
    assert_ne!(recorder.thread_of(2), recorder.thread_of(1));

    assert_eq!(executor.decrement_concurrency(1), 1);
    assert_eq!(executor.decrement_concurrency(5), 1);
    assert!(executor.set_concurrency_limit(0).is_err());
    assert_eq!(executor.concurrency_limit(), 1);

    f.resolve(1);
    recorder.wait_finished(2);
    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("raising_the_limit_admits_queued_work");
}

#[test]
fn configure_switches_to_fifo_hosting() {
    init_test("configure_switches_to_fifo_hosting");
    let (executor, recorder) = controlled(1, true, HostingPolicy::SameSession);
    let f = future();

    executor.submit(Job::awaiting(1, &f).in_session("a")).unwrap();
    executor.submit(Job::plain(2).in_session("b")).unwrap();
    wait_until("parked host", || executor.number_of_waiting() == 1);

    executor.configure(1, true, HostingPolicy::Fifo).unwrap();
    recorder.wait_finished(1);
    assert_eq!(recorder.thread_of(2), recorder.thread_of(1));

    f.resolve(1);
    recorder.wait_finished(2);
    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("configure_switches_to_fifo_hosting");
}

#[test]
fn panicking_serve_still_finishes() {
    init_test("panicking_serve_still_finishes");
    let (executor, recorder) = controlled(1, true, HostingPolicy::Fifo);

    executor.submit(Job::plain(1).panicking()).unwrap();
    executor.submit(Job::plain(2)).unwrap();
    recorder.wait_finished(2);
    assert_eq!(recorder.finished(), vec![1, 2]);

    assert!(executor.shutdown_and_wait(TEST_TIMEOUT));
    test_complete!("panicking_serve_still_finishes");
}
