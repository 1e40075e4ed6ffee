//! Multiactive: per-body request scheduling with wait-by-necessity and
//! thread hosting.
//!
//! # Overview
//!
//! A *body* is an active object that receives requests through a queue and
//! serves them with its own scheduler. Multiactive lets a body serve several
//! requests at once under an explicit concurrency limit. A request that
//! touches a result that has not arrived yet is parked by the body's
//! executor instead of blocking blindly, and the executor may lend the
//! parked thread to another ready request so the thread budget is never
//! wasted on waiting.
//!
//! # Core Guarantees
//!
//! - **Bounded activity**: at most `active_limit` requests are active at once
//! - **Thread budget**: with a hard limit, serving threads never exceed the
//!   active limit, yet a blocked request never deadlocks the body
//! - **Exactly once**: every submitted request is served once and its
//!   `finished` callback runs once
//! - **Oldest first**: parked requests whose futures arrived resume in the
//!   order they parked
//! - **Compatibility**: a request is admitted only alongside requests whose
//!   [`MethodGroup`] allows it
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers (bodies, requests, futures, workers, sessions)
//!   and method groups
//! - [`executor`]: Executors, the owner contract, limits and configuration
//! - [`future`]: Futures, the waiter contract and the waiter registry
//! - [`runtime`]: The serving thread pool
//! - [`error`]: Error types
//! - [`tracing_compat`]: Logging shim over `tracing`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod executor;
pub mod future;
pub mod runtime;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use error::{ConfigError, Error, ErrorKind, Result, SubmitError};
pub use executor::{
    ControlledRequestExecutor, ExecutorBuilder, ExecutorConfig, ExecutorSnapshot, HostingPolicy,
    Limits, MinimalRequestExecutor, RequestExecutor, RequestOwner, ServeContext,
    ServingController,
};
pub use future::{AwaitedFuture, FutureProxy, FutureWaiter, FutureWaiterRegistry, WaitOutcome};
pub use types::{BodyId, FutureId, MethodGroup, RequestToken, SessionTag, WorkerId};
