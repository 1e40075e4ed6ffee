//! Request executors.
//!
//! An executor takes requests submitted to a body and runs the owner's serve
//! routine for each of them on serving threads.
//!
//! - [`MinimalRequestExecutor`]: one serving task per request, no limits
//! - [`ControlledRequestExecutor`]: bounded concurrency with wait-by-necessity
//!   and thread hosting
//!
//! # Owner Contract
//!
//! The body's side of the contract is [`RequestOwner`]: `serve` runs the
//! request, `finished` is called once afterwards on the same thread,
//! `session_tag` optionally groups requests for
//! [`HostingPolicy::SameSession`], and `method_group` restricts which
//! requests the controlled executor lets run at the same time.
//!
//! # Quick Start
//!
//! ```ignore
//! use multiactive::executor::{ExecutorBuilder, RequestExecutor};
//!
//! let executor = ExecutorBuilder::new()
//!     .active_limit(2)
//!     .hard_limit(true)
//!     .build(owner, body)?;
//! executor.submit(request)?;
//! ```

mod builder;
pub mod config;
mod context;
mod controlled;
pub mod env_config;
mod minimal;
mod runnable;
pub(crate) mod state;

pub use builder::ExecutorBuilder;
pub use config::{ExecutorConfig, HostingPolicy, Limits};
pub use context::ServeContext;
pub use controlled::ControlledRequestExecutor;
pub use minimal::MinimalRequestExecutor;
pub use state::ExecutorSnapshot;

use crate::error::{Result, SubmitError};
use crate::types::{MethodGroup, SessionTag};

/// The body side of request execution.
pub trait RequestOwner: Send + Sync + 'static {
    /// The request type served by this owner.
    type Request: Send + 'static;

    /// Serves one request.
    ///
    /// May block on futures through `cx`; a panic is caught by the executor
    /// and does not affect other requests.
    fn serve(&self, cx: &ServeContext, request: &mut Self::Request);

    /// Called exactly once after `serve` returned or panicked.
    fn finished(&self, _request: Self::Request) {}

    /// Session of a request, used by [`HostingPolicy::SameSession`].
    fn session_tag(&self, _request: &Self::Request) -> Option<SessionTag> {
        None
    }

    /// Method group of a request, read once at submission.
    ///
    /// The controlled executor admits a request only if its group is
    /// compatible with every admitted request that has not finished (parked
    /// ones included) and with every older request still queued. `None`
    /// places no constraint.
    fn method_group(&self, _request: &Self::Request) -> Option<MethodGroup> {
        None
    }
}

/// Common interface of the executors.
pub trait RequestExecutor: Send + Sync {
    /// The request type accepted by this executor.
    type Request: Send + 'static;

    /// Queues a request for serving.
    ///
    /// Never blocks. A rejected request is handed back in the error.
    fn submit(&self, request: Self::Request) -> core::result::Result<(), SubmitError<Self::Request>>;

    /// Requests submitted but not yet admitted.
    fn number_of_ready(&self) -> usize;

    /// Requests admitted and not blocked.
    fn number_of_active(&self) -> usize;

    /// Requests parked on a future.
    fn number_of_waiting(&self) -> usize;
}

/// Runtime adjustment of an executor's admission limits.
///
/// Every change wakes the coordinator, so raising a limit admits queued
/// work at once. Lowering a limit never preempts: requests already admitted
/// keep running and the new limit applies to later admissions.
pub trait ServingController {
    /// Current maximum number of active requests.
    fn concurrency_limit(&self) -> usize;

    /// Sets the maximum number of active requests.
    ///
    /// A limit of zero is rejected and leaves the limit unchanged.
    fn set_concurrency_limit(&self, limit: usize) -> Result<()>;

    /// Raises the limit by `by` and returns the new limit.
    fn increment_concurrency(&self, by: usize) -> usize;

    /// Lowers the limit by `by` and returns the new limit.
    ///
    /// Ignored if it would bring the limit below 1.
    fn decrement_concurrency(&self, by: usize) -> usize;

    /// Replaces all admission limits at once.
    fn configure(&self, active_limit: usize, hard_limit: bool, hosting: HostingPolicy) -> Result<()>;
}
