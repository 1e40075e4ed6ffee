//! Thread machinery shared by the executors.
//!
//! - [`worker_pool`]: cached pool of serving threads with idle retirement

pub mod worker_pool;

pub use worker_pool::{Job, WorkerPool, WorkerPoolOptions};
