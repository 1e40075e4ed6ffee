//! Executor configuration types.
//!
//! In most cases you should use [`ExecutorBuilder`](super::ExecutorBuilder)
//! to construct an executor rather than filling in an [`ExecutorConfig`]
//! directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `active_limit` | 1 |
//! | `hard_limit` | true |
//! | `hosting` | [`HostingPolicy::Fifo`] |
//! | `thread_name_prefix` | `"multiactive"` |
//! | `idle_timeout` | 10 s |
//! | `shutdown_timeout` | 5 s |

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default thread name prefix for serving and coordinator threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "multiactive";

/// Default idle timeout before a cached serving thread retires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the shutdown performed when an executor is dropped.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How the hosting pass pairs a blocked host with a ready parasite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostingPolicy {
    /// Oldest eligible host takes the oldest ready request.
    #[default]
    Fifo,
    /// A host only takes ready requests carrying its own session tag, so a
    /// re-entrant call runs on the thread of the request waiting for it.
    SameSession,
}

impl HostingPolicy {
    /// Returns the configuration spelling of this policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::SameSession => "same-session",
        }
    }
}

impl fmt::Display for HostingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostingPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "same-session" | "same_session" | "session" => Ok(Self::SameSession),
            _ => Err(ConfigError::InvalidValue {
                var: "hosting_policy".to_string(),
                value: s.to_string(),
                expected: "fifo or same-session",
            }),
        }
    }
}

/// Admission limits of a controlled executor.
///
/// These can change while the executor runs; see
/// [`ServingController`](super::ServingController).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of concurrently active requests.
    pub active_limit: usize,
    /// When true, the number of threads serving requests is capped at
    /// `active_limit` as well, and blocked threads host ready requests. A
    /// pool thread that outlived its idle timeout may still be exiting when
    /// a new one starts.
    pub hard_limit: bool,
    /// Parasite selection for the hosting pass.
    pub hosting: HostingPolicy,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            active_limit: 1,
            hard_limit: true,
            hosting: HostingPolicy::Fifo,
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of concurrently active requests (default: 1).
    pub active_limit: usize,
    /// Cap serving threads at `active_limit` too (default: true).
    pub hard_limit: bool,
    /// Parasite selection for the hosting pass.
    pub hosting: HostingPolicy,
    /// Name prefix for serving and coordinator threads.
    pub thread_name_prefix: String,
    /// Idle time after which a cached serving thread exits.
    pub idle_timeout: Duration,
    /// Bound on the shutdown performed by `Drop`.
    pub shutdown_timeout: Duration,
}

impl ExecutorConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.active_limit == 0 {
            self.active_limit = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
        if self.idle_timeout.is_zero() {
            self.idle_timeout = DEFAULT_IDLE_TIMEOUT;
        }
    }

    /// Returns the admission limits part of the configuration.
    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits {
            active_limit: self.active_limit,
            hard_limit: self.hard_limit,
            hosting: self.hosting,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            active_limit: 1,
            hard_limit: true,
            hosting: HostingPolicy::Fifo,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}
