//! A submitted request together with its parking slot.

use crate::future::WaitOutcome;
use crate::types::RequestToken;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Owns a request until its serve routine takes it, and the condvar the
/// request parks on while it waits for a future.
///
/// The coordinator talks to a parked request only through [`resume`] and
/// [`lend`]; the parked thread runs [`block_until_resumed`].
///
/// [`resume`]: RunnableRequest::resume
/// [`lend`]: RunnableRequest::lend
/// [`block_until_resumed`]: RunnableRequest::block_until_resumed
pub(crate) struct RunnableRequest<R> {
    token: RequestToken,
    request: Mutex<Option<R>>,
    park: Mutex<ParkState<R>>,
    condvar: Condvar,
}

struct ParkState<R> {
    resumed: Option<WaitOutcome>,
    parasite: Option<Arc<RunnableRequest<R>>>,
}

impl<R> RunnableRequest<R> {
    pub(crate) fn new(token: RequestToken, request: R) -> Self {
        Self {
            token,
            request: Mutex::new(Some(request)),
            park: Mutex::new(ParkState {
                resumed: None,
                parasite: None,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn token(&self) -> RequestToken {
        self.token
    }

    /// Takes the request out; `None` if it was already taken.
    pub(crate) fn take_request(&self) -> Option<R> {
        self.request.lock().take()
    }

    /// Wakes the parked thread with `outcome`.
    pub(crate) fn resume(&self, outcome: WaitOutcome) {
        let mut park = self.park.lock();
        park.resumed = Some(outcome);
        self.condvar.notify_one();
    }

    /// Hands `parasite` to the parked thread to run in place.
    pub(crate) fn lend(&self, parasite: Arc<Self>) {
        let mut park = self.park.lock();
        park.parasite = Some(parasite);
        self.condvar.notify_one();
    }

    /// Parks until resumed, running lent parasites in the meantime.
    ///
    /// `on_deadline` runs once, without the park lock held, when `deadline`
    /// passes; afterwards the wait continues without a deadline until the
    /// coordinator resumes the request.
    pub(crate) fn block_until_resumed(
        &self,
        deadline: Option<Instant>,
        mut run_parasite: impl FnMut(Arc<Self>),
        mut on_deadline: impl FnMut(),
    ) -> WaitOutcome {
        let mut deadline = deadline;
        let mut park = self.park.lock();
        loop {
            if let Some(outcome) = park.resumed.take() {
                return outcome;
            }
            if let Some(parasite) = park.parasite.take() {
                MutexGuard::unlocked(&mut park, || run_parasite(parasite));
                continue;
            }
            match deadline {
                Some(d) => {
                    let timed_out = self.condvar.wait_until(&mut park, d).timed_out();
                    if timed_out && park.resumed.is_none() && park.parasite.is_none() {
                        deadline = None;
                        MutexGuard::unlocked(&mut park, || on_deadline());
                    }
                }
                None => self.condvar.wait(&mut park),
            }
        }
    }
}

impl<R> fmt::Debug for RunnableRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let park = self.park.lock();
        f.debug_struct("RunnableRequest")
            .field("token", &self.token)
            .field("taken", &self.request.lock().is_none())
            .field("resumed", &park.resumed)
            .field("lent", &park.parasite.is_some())
            .finish()
    }
}
