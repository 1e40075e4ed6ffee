//! Error types for the request scheduler.
//!
//! The scheduler surfaces very few errors of its own: a serve routine's
//! failure belongs to the owner, and a wait that cannot complete is reported
//! as a [`WaitOutcome`](crate::future::WaitOutcome), not an error. What
//! remains is:
//!
//! - **Shutdown**: the executor no longer accepts work
//! - **Configuration**: invalid limits, environment values or config files
//! - **Spawn**: the operating system refused a worker thread
//! - **Internal**: scheduler bookkeeping is inconsistent (a bug)

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The executor has been shut down.
    Shutdown,
    /// A configuration value is invalid.
    InvalidConfig,
    /// A worker thread could not be spawned.
    SpawnFailed,
    /// Internal scheduler error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns true if retrying the failed operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SpawnFailed)
    }
}

/// The main error type for scheduler operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error reports a shut-down executor.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, ErrorKind::Shutdown)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfig)
            .with_message(e.to_string())
            .with_source(e)
    }
}

/// Error returned by `submit` when the request cannot be accepted.
///
/// The rejected request is handed back to the caller.
#[derive(Debug)]
pub enum SubmitError<R> {
    /// The executor has been shut down.
    Shutdown(R),
}

impl<R> SubmitError<R> {
    /// Recovers the rejected request.
    pub fn into_inner(self) -> R {
        match self {
            Self::Shutdown(r) => r,
        }
    }
}

impl<R> fmt::Display for SubmitError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown(_) => write!(f, "executor has been shut down"),
        }
    }
}

impl<R: fmt::Debug> std::error::Error for SubmitError<R> {}

impl<R> From<SubmitError<R>> for Error {
    fn from(e: SubmitError<R>) -> Self {
        match e {
            SubmitError::Shutdown(_) => {
                Self::new(ErrorKind::Shutdown).with_message("request rejected")
            }
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable or config entry could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable or key name.
        var: String,
        /// The rejected raw value.
        value: String,
        /// Human-readable description of the accepted values.
        expected: &'static str,
    },
    /// A limit is out of range.
    #[error("invalid {name}: {reason}")]
    InvalidLimit {
        /// Name of the limit.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A config file could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = core::result::Result<T, Error>;
