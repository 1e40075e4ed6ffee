//! Futures, wait-by-necessity, and the waiter contract.
//!
//! A serving thread that touches a result that has not been computed yet
//! does not block on the future itself. The future looks up the
//! [`FutureWaiter`] registered for the body being served and delegates the
//! wait to it, so the body's scheduler can account for the parked thread and
//! lend it to other work in the meantime.
//!
//! - [`AwaitedFuture`]: what the scheduler needs from a future
//! - [`FutureWaiter`]: the scheduler side of a delegated wait
//! - [`FutureWaiterRegistry`]: body identity → waiter
//! - [`FutureProxy`]: a concrete future that delegates through the registry

mod proxy;
mod registry;

pub use proxy::FutureProxy;
pub use registry::FutureWaiterRegistry;

use crate::executor::ServeContext;
use crate::types::FutureId;
use std::time::{Duration, Instant};

/// Longest sleep of the default [`AwaitedFuture::block_until_available`].
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// The view of an asynchronous result that the scheduler relies on.
///
/// Implementations must make `is_available` return `true` before they
/// report the arrival to any waiter.
pub trait AwaitedFuture: Send + Sync {
    /// Identity of the future.
    fn id(&self) -> FutureId;

    /// Returns true once the value has arrived.
    fn is_available(&self) -> bool;

    /// Blocks the calling thread until the value arrives or `deadline`
    /// passes, returning whether it arrived.
    ///
    /// Used when the body has no registered waiter. The default polls
    /// `is_available` with a backoff capped at 5 ms; futures that can wake
    /// their waiters should override it.
    fn block_until_available(&self, deadline: Option<Instant>) -> bool {
        let mut interval = Duration::from_micros(50);
        loop {
            if self.is_available() {
                return true;
            }
            let now = Instant::now();
            let sleep = match deadline {
                Some(d) if now >= d => return false,
                Some(d) => interval.min(d - now),
                None => interval,
            };
            std::thread::sleep(sleep);
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        }
    }
}

/// How a delegated wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// The value was already there; the caller never parked.
    Available,
    /// The caller parked and was resumed after the value arrived.
    Resumed,
    /// The deadline passed before the value arrived.
    TimedOut,
    /// The executor shut down while the caller was parked.
    Cancelled,
}

impl WaitOutcome {
    /// Returns true if the awaited value is available to the caller.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Available | Self::Resumed)
    }
}

/// The scheduler side of wait-by-necessity.
pub trait FutureWaiter: Send + Sync {
    /// Parks the request identified by `cx` until `future` arrives, the
    /// deadline passes, or the waiter shuts down.
    ///
    /// Must be called from inside the serve routine of the request `cx`
    /// describes.
    fn wait_for_future(
        &self,
        cx: &ServeContext,
        future: &dyn AwaitedFuture,
        deadline: Option<Instant>,
    ) -> WaitOutcome;

    /// Reports that the value of `future` has arrived.
    fn future_arrived(&self, future: FutureId);
}
