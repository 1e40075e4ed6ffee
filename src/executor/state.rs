//! Bookkeeping of a controlled executor.
//!
//! [`SchedulerState`] holds every set the admission policy is defined over
//! and nothing else: no threads, no locks, no requests. Event methods record
//! what happened (a request was submitted, started, parked, stopped; a
//! future arrived) and [`schedule`](SchedulerState::schedule) returns the
//! [`Decision`]s the coordinator has to carry out. Keeping the state pure lets
//! the admission rules be exercised directly by property tests.
//!
//! # Sets
//!
//! - `ready`: submitted, not yet admitted (FIFO)
//! - `active`: admitted and not blocked, including dispatched requests whose
//!   thread has not picked them up yet (`starting`)
//! - `waiting`: parked inside a delegated future wait
//! - `arrived`: futures that arrived while at least one request waited on them
//! - `threads_in_use`: per worker, the stack of requests it is serving; the
//!   top is the one actually running, everything below is a host
//! - `host_of`: host → the parasite it was lent to
//! - `groups`: the [`MethodGroup`] of each request that declared one
//!
//! A request is in at most one of `ready`, `active` and `waiting`, and no two
//! requests in `active` or `waiting` have incompatible groups.
//!
//! # Passes
//!
//! Each call to `schedule` runs, in order:
//!
//! 1. **Resume**: waiting requests whose future arrived, or whose wait was
//!    detached by a timeout or shutdown, move back to `active`. A host whose
//!    parasite is still live is skipped. Under the soft limit resumption
//!    needs a free active slot; under the hard limit it is unconditional
//!    because the request already owns its thread.
//! 2. **Dispatch**: ready requests are admitted while `active` is below the
//!    limit and, under the hard limit, while another thread may be used.
//! 3. **Hosting** (hard limit only): while `active` is below the limit, the
//!    oldest waiting request that is not already hosting lends its thread to
//!    a ready request chosen by the [`HostingPolicy`].
//!
//! Dispatch and hosting only take an *admissible* ready request: one whose
//! group is compatible with every admitted request and with every older
//! ready request. A blocked request stays queued without holding back the
//! compatible requests behind it.

use super::config::{HostingPolicy, Limits};
use crate::future::WaitOutcome;
use crate::tracing_compat::{error, trace};
use crate::types::group::compatible;
use crate::types::{FutureId, MethodGroup, RequestToken, SessionTag, WorkerId};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// A step the coordinator carries out after a scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Wake a parked request with the given outcome.
    Resume {
        token: RequestToken,
        outcome: WaitOutcome,
    },
    /// Hand a ready request to a new or idle serving thread.
    Dispatch(RequestToken),
    /// Run `parasite` on the thread of the parked `host`.
    Host {
        host: RequestToken,
        parasite: RequestToken,
    },
}

/// Why a parked request stopped waiting for its future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detach {
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct WaitEntry {
    /// `None` once detached.
    future: Option<FutureId>,
    detached: Option<Detach>,
}

/// Point-in-time view of a controlled executor's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorSnapshot {
    /// Requests submitted but not yet admitted.
    pub ready: usize,
    /// Admitted requests that are not blocked.
    pub active: usize,
    /// Requests parked on a future.
    pub waiting: usize,
    /// Arrived futures that still have parked waiters.
    pub arrived: usize,
    /// Serving threads currently holding at least one request.
    pub threads_in_use: usize,
    /// Hosts whose parasite is still running or parked.
    pub hosted: usize,
    /// Dispatched requests not yet picked up by a thread.
    pub starting: usize,
}

#[derive(Debug)]
pub(crate) struct SchedulerState {
    limits: Limits,
    ready: VecDeque<RequestToken>,
    active: HashSet<RequestToken>,
    starting: HashSet<RequestToken>,
    waiting: BTreeMap<RequestToken, WaitEntry>,
    arrived: HashSet<FutureId>,
    waiters_by_future: HashMap<FutureId, VecDeque<RequestToken>>,
    threads_in_use: HashMap<WorkerId, Vec<RequestToken>>,
    host_of: HashMap<RequestToken, RequestToken>,
    sessions: HashMap<RequestToken, SessionTag>,
    groups: HashMap<RequestToken, MethodGroup>,
    shutdown: bool,
}

/// Logs and panics on broken scheduler bookkeeping.
#[track_caller]
pub(crate) fn violation(what: &str, token: RequestToken) -> ! {
    error!(request = %token, "scheduler invariant violated: {what}");
    panic!("scheduler invariant violated: {what} ({token})");
}

impl SchedulerState {
    pub(crate) fn new(limits: Limits) -> Self {
        Self {
            limits,
            ready: VecDeque::new(),
            active: HashSet::new(),
            starting: HashSet::new(),
            waiting: BTreeMap::new(),
            arrived: HashSet::new(),
            waiters_by_future: HashMap::new(),
            threads_in_use: HashMap::new(),
            host_of: HashMap::new(),
            sessions: HashMap::new(),
            groups: HashMap::new(),
            shutdown: false,
        }
    }

    pub(crate) fn limits(&self) -> Limits {
        self.limits
    }

    pub(crate) fn set_limits(&mut self, limits: Limits) {
        trace!(
            active_limit = limits.active_limit,
            hard_limit = limits.hard_limit,
            hosting = %limits.hosting,
            "limits changed"
        );
        self.limits = limits;
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    /// Marks the state as shutting down and detaches every parked request.
    ///
    /// Returns the number of waits that were cancelled.
    pub(crate) fn begin_shutdown(&mut self) -> usize {
        self.shutdown = true;
        let parked: Vec<RequestToken> = self.waiting.keys().copied().collect();
        parked
            .into_iter()
            .filter(|&token| self.detach(token, Detach::Cancelled))
            .count()
    }

    pub(crate) fn submit(
        &mut self,
        token: RequestToken,
        session: Option<SessionTag>,
        group: Option<MethodGroup>,
    ) {
        if let Some(tag) = session {
            self.sessions.insert(token, tag);
        }
        if let Some(group) = group {
            self.groups.insert(token, group);
        }
        self.ready.push_back(token);
        trace!(request = %token, ready = self.ready.len(), "request queued");
    }

    /// Records that `worker` began serving `token`.
    pub(crate) fn serve_started(&mut self, token: RequestToken, worker: WorkerId) {
        if !self.active.contains(&token) {
            violation("started request is not active", token);
        }
        self.starting.remove(&token);
        self.threads_in_use.entry(worker).or_default().push(token);
        trace!(request = %token, worker = %worker, "serve started");
    }

    /// Records that `worker` finished serving `token`.
    ///
    /// # Panics
    ///
    /// Panics if `token` is not the top of `worker`'s stack or not active.
    pub(crate) fn serve_stopped(&mut self, token: RequestToken, worker: WorkerId) {
        let popped = match self.threads_in_use.get_mut(&worker) {
            Some(stack) => {
                let popped = stack.pop();
                if stack.is_empty() {
                    self.threads_in_use.remove(&worker);
                }
                popped
            }
            None => None,
        };
        if popped != Some(token) {
            violation("stopped request is not the top of its worker stack", token);
        }
        if !self.active.remove(&token) {
            violation("stopped request is not active", token);
        }
        self.sessions.remove(&token);
        self.groups.remove(&token);
        trace!(request = %token, worker = %worker, "serve stopped");
    }

    /// Moves an active request to `waiting` on `future`.
    pub(crate) fn park(&mut self, token: RequestToken, future: FutureId) {
        if !self.active.remove(&token) {
            violation("parked request is not active", token);
        }
        self.waiting.insert(
            token,
            WaitEntry {
                future: Some(future),
                detached: None,
            },
        );
        self.waiters_by_future
            .entry(future)
            .or_default()
            .push_back(token);
        trace!(request = %token, future = %future, waiting = self.waiting.len(), "request parked");
    }

    /// Records the arrival of `future`.
    ///
    /// Returns false if no request waits on it or it was already recorded.
    pub(crate) fn future_arrived(&mut self, future: FutureId) -> bool {
        if !self.waiters_by_future.contains_key(&future) {
            trace!(future = %future, "arrival without waiters ignored");
            return false;
        }
        let fresh = self.arrived.insert(future);
        if fresh {
            trace!(future = %future, "future arrived");
        }
        fresh
    }

    /// Detaches a parked request from its future.
    ///
    /// The request stays in `waiting` until the resume pass picks it up with
    /// the matching outcome. Returns false if the request is no longer
    /// parked, was already detached, or its future has arrived.
    pub(crate) fn detach(&mut self, token: RequestToken, reason: Detach) -> bool {
        let Some(entry) = self.waiting.get_mut(&token) else {
            return false;
        };
        if entry.detached.is_some() || entry.future.is_some_and(|f| self.arrived.contains(&f)) {
            return false;
        }
        let future = entry.future.take();
        entry.detached = Some(reason);
        if let Some(future) = future {
            Self::remove_waiter(
                &mut self.waiters_by_future,
                &mut self.arrived,
                future,
                token,
            );
        }
        trace!(request = %token, reason = ?reason, "wait detached");
        true
    }

    /// Puts a dispatched request back at the head of `ready` after its job
    /// could not be handed to a thread.
    pub(crate) fn abort_dispatch(&mut self, token: RequestToken) {
        if !self.starting.remove(&token) || !self.active.remove(&token) {
            violation("aborted dispatch of a request that was not starting", token);
        }
        self.ready.push_front(token);
    }

    /// Runs the resume, dispatch and hosting passes once.
    pub(crate) fn schedule(&mut self) -> Vec<Decision> {
        let mut decisions = Vec::new();
        self.resume_pass(&mut decisions);
        self.dispatch_pass(&mut decisions);
        if self.limits.hard_limit {
            self.hosting_pass(&mut decisions);
        }
        decisions
    }

    fn resume_pass(&mut self, decisions: &mut Vec<Decision>) {
        let candidates: Vec<(RequestToken, WaitOutcome)> = self
            .waiting
            .iter()
            .filter_map(|(&token, entry)| {
                let outcome = match (entry.detached, entry.future) {
                    (Some(Detach::TimedOut), _) => WaitOutcome::TimedOut,
                    (Some(Detach::Cancelled), _) => WaitOutcome::Cancelled,
                    (None, Some(f)) if self.arrived.contains(&f) => WaitOutcome::Resumed,
                    _ => return None,
                };
                self.is_not_a_host(token).then_some((token, outcome))
            })
            .collect();

        for (token, outcome) in candidates {
            if !self.can_resume_one() {
                break;
            }
            self.resume(token);
            trace!(request = %token, outcome = ?outcome, active = self.active.len(), "request resumed");
            decisions.push(Decision::Resume { token, outcome });
        }
    }

    fn dispatch_pass(&mut self, decisions: &mut Vec<Decision>) {
        let mut index = 0;
        while index < self.ready.len() && self.can_serve_one() {
            if !self.is_admissible(index) {
                index += 1;
                continue;
            }
            let Some(token) = self.ready.remove(index) else {
                break;
            };
            self.active.insert(token);
            self.starting.insert(token);
            trace!(request = %token, active = self.active.len(), "request dispatched");
            decisions.push(Decision::Dispatch(token));
        }
    }

    fn hosting_pass(&mut self, decisions: &mut Vec<Decision>) {
        while self.active.len() < self.limits.active_limit && !self.ready.is_empty() {
            let Some((host, index)) = self.find_host() else {
                break;
            };
            let Some(parasite) = self.ready.remove(index) else {
                break;
            };
            self.active.insert(parasite);
            self.host_of.insert(host, parasite);
            trace!(host = %host, parasite = %parasite, "request hosted");
            decisions.push(Decision::Host { host, parasite });
        }
    }

    /// Finds the oldest waiting request that can host, together with the
    /// index in `ready` of the parasite it should take.
    fn find_host(&self) -> Option<(RequestToken, usize)> {
        self.waiting
            .iter()
            .filter(|&(&token, entry)| {
                entry.detached.is_none()
                    && entry.future.is_some_and(|f| !self.arrived.contains(&f))
                    && self.is_not_a_host(token)
            })
            .find_map(|(&host, _)| {
                let mut candidates = 0..self.ready.len();
                let index = match self.limits.hosting {
                    HostingPolicy::Fifo => candidates.find(|&i| self.is_admissible(i)),
                    HostingPolicy::SameSession => {
                        let tag = self.sessions.get(&host)?;
                        candidates.find(|&i| {
                            self.sessions.get(&self.ready[i]) == Some(tag) && self.is_admissible(i)
                        })
                    }
                };
                index.map(|i| (host, i))
            })
    }

    /// Whether `ready[index]` may be admitted next to the admitted requests
    /// and the ready requests queued before it.
    fn is_admissible(&self, index: usize) -> bool {
        let Some(group) = self.ready.get(index).and_then(|t| self.groups.get(t)) else {
            return true;
        };
        let conflicts = |other: &RequestToken| !compatible(Some(group), self.groups.get(other));
        !(self.active.iter().any(conflicts)
            || self.waiting.keys().any(conflicts)
            || self.ready.iter().take(index).any(conflicts))
    }

    fn can_resume_one(&self) -> bool {
        self.limits.hard_limit || self.active.len() < self.limits.active_limit
    }

    fn can_serve_one(&self) -> bool {
        if self.active.len() >= self.limits.active_limit {
            return false;
        }
        !self.limits.hard_limit
            || self.threads_in_use.len() + self.starting.len() < self.limits.active_limit
    }

    /// True unless `token` lent its thread to a parasite that is still
    /// active or waiting.
    fn is_not_a_host(&self, token: RequestToken) -> bool {
        self.host_of
            .get(&token)
            .map_or(true, |p| !self.active.contains(p) && !self.waiting.contains_key(p))
    }

    fn resume(&mut self, token: RequestToken) {
        let Some(entry) = self.waiting.remove(&token) else {
            violation("resumed request is not waiting", token);
        };
        if let Some(future) = entry.future {
            Self::remove_waiter(
                &mut self.waiters_by_future,
                &mut self.arrived,
                future,
                token,
            );
        }
        self.host_of.remove(&token);
        self.active.insert(token);
    }

    fn remove_waiter(
        waiters_by_future: &mut HashMap<FutureId, VecDeque<RequestToken>>,
        arrived: &mut HashSet<FutureId>,
        future: FutureId,
        token: RequestToken,
    ) {
        if let Some(list) = waiters_by_future.get_mut(&future) {
            list.retain(|t| *t != token);
            if list.is_empty() {
                waiters_by_future.remove(&future);
                arrived.remove(&future);
            }
        }
    }

    pub(crate) fn number_of_ready(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn number_of_active(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn number_of_waiting(&self) -> usize {
        self.waiting.len()
    }

    /// True when no request is queued, admitted or parked.
    pub(crate) fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.active.is_empty() && self.waiting.is_empty()
    }

    pub(crate) fn snapshot(&self) -> ExecutorSnapshot {
        ExecutorSnapshot {
            ready: self.ready.len(),
            active: self.active.len(),
            waiting: self.waiting.len(),
            arrived: self.arrived.len(),
            threads_in_use: self.threads_in_use.len(),
            hosted: self
                .host_of
                .keys()
                .filter(|&&h| !self.is_not_a_host(h))
                .count(),
            starting: self.starting.len(),
        }
    }

    /// Checks the structural invariants, returning the first one broken.
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for token in &self.ready {
            if !seen.insert(*token) {
                return Err(format!("{token} queued twice"));
            }
            if self.active.contains(token) || self.waiting.contains_key(token) {
                return Err(format!("{token} ready and admitted"));
            }
        }
        for token in &self.active {
            if self.waiting.contains_key(token) {
                return Err(format!("{token} active and waiting"));
            }
        }
        if let Some(token) = self.starting.iter().find(|t| !self.active.contains(*t)) {
            return Err(format!("{token} starting but not active"));
        }

        for (token, entry) in &self.waiting {
            if let Some(future) = entry.future {
                let listed = self
                    .waiters_by_future
                    .get(&future)
                    .is_some_and(|l| l.contains(token));
                if !listed {
                    return Err(format!("{token} waits on {future} but is not listed"));
                }
            }
        }
        for (future, list) in &self.waiters_by_future {
            if list.is_empty() {
                return Err(format!("{future} has an empty waiter list"));
            }
            for token in list {
                let parked_here = self
                    .waiting
                    .get(token)
                    .is_some_and(|e| e.future == Some(*future));
                if !parked_here {
                    return Err(format!("{token} listed under {future} but not parked on it"));
                }
            }
        }
        if let Some(future) = self
            .arrived
            .iter()
            .find(|f| !self.waiters_by_future.contains_key(*f))
        {
            return Err(format!("{future} arrived without waiters"));
        }
        if let Some(host) = self.host_of.keys().find(|h| !self.waiting.contains_key(*h)) {
            return Err(format!("{host} hosts but is not waiting"));
        }

        let admitted: Vec<RequestToken> =
            self.active.iter().chain(self.waiting.keys()).copied().collect();
        for (i, a) in admitted.iter().enumerate() {
            if let Some(b) = admitted[i + 1..]
                .iter()
                .find(|b| !compatible(self.groups.get(a), self.groups.get(*b)))
            {
                return Err(format!("{a} and {b} admitted with incompatible groups"));
            }
        }

        let mut on_stack = HashSet::new();
        for (worker, stack) in &self.threads_in_use {
            let Some((top, below)) = stack.split_last() else {
                return Err(format!("{worker} has an empty stack"));
            };
            if !self.active.contains(top) && !self.waiting.contains_key(top) {
                return Err(format!("{top} on top of {worker} is neither active nor waiting"));
            }
            if let Some(token) = below.iter().find(|t| !self.waiting.contains_key(*t)) {
                return Err(format!("{token} below the top of {worker} is not waiting"));
            }
            for token in stack {
                if !on_stack.insert(*token) {
                    return Err(format!("{token} is on two stacks"));
                }
            }
        }
        if let Some(token) = self.waiting.keys().find(|t| !on_stack.contains(*t)) {
            return Err(format!("{token} waits without a thread"));
        }
        Ok(())
    }

    #[cfg(test)]
    fn top_of(&self, worker: WorkerId) -> Option<RequestToken> {
        self.threads_in_use
            .get(&worker)
            .and_then(|s| s.last().copied())
    }
}
