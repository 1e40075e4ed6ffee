//! Identifier types for scheduler entities.
//!
//! These types provide type-safe identifiers for the entities the request
//! scheduler tracks: bodies (active objects), wrapped requests, futures, and
//! serving workers. All of them are plain `u64` newtypes; fresh values are
//! drawn from process-wide counters so identifiers never collide across
//! executors.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static BODY_COUNTER: AtomicU64 = AtomicU64::new(1);
static FUTURE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of an active object ("body").
///
/// The [`FutureWaiterRegistry`](crate::future::FutureWaiterRegistry) is keyed
/// by this identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(u64);

impl BodyId {
    /// Allocates a fresh, process-unique body identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(BODY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a body ID from a raw value.
    ///
    /// Used by transports that carry body identities over the wire.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BodyId({})", self.0)
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Scheduler-assigned token of a wrapped request.
///
/// Tokens are allocated per executor in submission order, so ordering two
/// tokens orders their submissions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(u64);

impl RequestToken {
    /// Creates a token from a raw sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the submission sequence number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestToken({})", self.0)
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// Identity of an asynchronous result.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FutureId(u64);

impl FutureId {
    /// Allocates a fresh, process-unique future identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(FUTURE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a future ID from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FutureId({})", self.0)
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Identity of a serving worker thread.
///
/// This is the key of the per-worker request stack. A parasite request
/// hosted by a blocked request runs under its host's worker ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Creates a worker ID from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Call-chain tag shared by a request and the re-entrant calls it causes.
///
/// Used by [`HostingPolicy::SameSession`](crate::executor::HostingPolicy) to
/// host a re-entrant call on the thread of the request that is waiting for it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionTag(String);

impl SessionTag {
    /// Creates a session tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionTag({:?})", self.0)
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
