//! Core types for the request scheduler.
//!
//! - [`id`]: Identifier types (`BodyId`, `RequestToken`, `FutureId`,
//!   `WorkerId`, `SessionTag`)
//! - [`group`]: `MethodGroup` compatibility rules

pub mod group;
pub mod id;

pub use group::MethodGroup;
pub use id::{BodyId, FutureId, RequestToken, SessionTag, WorkerId};
