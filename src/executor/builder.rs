//! Fluent, move-based executor builder.
//!
//! Each builder method consumes `self` and returns an updated builder.
//! Values set through builder methods take precedence over environment
//! variables, which take precedence over a config file, which takes
//! precedence over [`ExecutorConfig::default()`].
//!
//! ```ignore
//! use multiactive::executor::{ExecutorBuilder, HostingPolicy};
//!
//! let executor = ExecutorBuilder::new()
//!     .active_limit(4)
//!     .hosting_policy(HostingPolicy::SameSession)
//!     .with_env_overrides()
//!     .build(owner, body)?;
//! ```

use super::config::{ExecutorConfig, HostingPolicy};
use super::env_config::apply_env_overrides;
use super::{ControlledRequestExecutor, MinimalRequestExecutor, RequestOwner};
use crate::error::Result;
use crate::future::FutureWaiterRegistry;
use crate::runtime::WorkerPoolOptions;
use crate::types::BodyId;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`ControlledRequestExecutor`] and [`MinimalRequestExecutor`].
#[derive(Debug, Clone, Default)]
pub struct ExecutorBuilder {
    base: ExecutorConfig,
    env: bool,
    active_limit: Option<usize>,
    hard_limit: Option<bool>,
    hosting: Option<HostingPolicy>,
    thread_name_prefix: Option<String>,
    idle_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    registry: Option<Arc<FutureWaiterRegistry>>,
}

impl ExecutorBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a TOML document instead of the defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let parsed = super::env_config::parse_toml_str(toml)?;
        let mut base = ExecutorConfig::default();
        super::env_config::apply_toml_config(&mut base, &parsed)?;
        Ok(Self {
            base,
            ..Self::default()
        })
    }

    /// Start from a TOML file instead of the defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let parsed = super::env_config::parse_toml_file(path.as_ref())?;
        let mut base = ExecutorConfig::default();
        super::env_config::apply_toml_config(&mut base, &parsed)?;
        Ok(Self {
            base,
            ..Self::default()
        })
    }

    /// Set the maximum number of active requests.
    #[must_use]
    pub fn active_limit(mut self, limit: usize) -> Self {
        self.active_limit = Some(limit);
        self
    }

    /// Cap serving threads at the active limit too.
    #[must_use]
    pub fn hard_limit(mut self, hard: bool) -> Self {
        self.hard_limit = Some(hard);
        self
    }

    /// Choose how blocked hosts pick parasites.
    #[must_use]
    pub fn hosting_policy(mut self, policy: HostingPolicy) -> Self {
        self.hosting = Some(policy);
        self
    }

    /// Set the serving thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Set how long an idle serving thread is kept.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the bound on the shutdown performed by `Drop`.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Register in `registry` instead of the process-wide one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<FutureWaiterRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Apply `MULTIACTIVE_*` environment variables when building.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.env = true;
        self
    }

    /// Resolve the final configuration.
    pub fn config(&self) -> Result<ExecutorConfig> {
        let mut config = self.base.clone();
        if self.env {
            apply_env_overrides(&mut config)?;
        }
        if let Some(v) = self.active_limit {
            config.active_limit = v;
        }
        if let Some(v) = self.hard_limit {
            config.hard_limit = v;
        }
        if let Some(v) = self.hosting {
            config.hosting = v;
        }
        if let Some(ref v) = self.thread_name_prefix {
            config.thread_name_prefix.clone_from(v);
        }
        if let Some(v) = self.idle_timeout {
            config.idle_timeout = v;
        }
        if let Some(v) = self.shutdown_timeout {
            config.shutdown_timeout = v;
        }
        config.normalize();
        Ok(config)
    }

    /// Build a controlled executor serving `owner`'s requests for `body`.
    pub fn build<O: RequestOwner>(
        self,
        owner: Arc<O>,
        body: BodyId,
    ) -> Result<ControlledRequestExecutor<O>> {
        let config = self.config()?;
        let registry = self.registry.unwrap_or_else(FutureWaiterRegistry::global);
        ControlledRequestExecutor::with_registry(body, owner, config, registry)
    }

    /// Build a minimal executor serving `owner`'s requests for `body`.
    ///
    /// Only the thread options of the configuration apply.
    pub fn build_minimal<O: RequestOwner>(
        self,
        owner: Arc<O>,
        body: BodyId,
    ) -> Result<MinimalRequestExecutor<O>> {
        let config = self.config()?;
        let registry = self.registry.unwrap_or_else(FutureWaiterRegistry::global);
        let options = WorkerPoolOptions {
            idle_timeout: config.idle_timeout,
            thread_name_prefix: format!("{}-{}", config.thread_name_prefix, body.as_u64()),
            ..WorkerPoolOptions::default()
        };
        Ok(MinimalRequestExecutor::with_options(
            body, owner, options, registry,
        ))
    }
}
