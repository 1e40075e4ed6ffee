//! Environment variable and config file support for [`ExecutorBuilder`](super::ExecutorBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`active_limit(4)`)
//! 2. **Environment variables**: values from `MULTIACTIVE_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`ExecutorConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `MULTIACTIVE_ACTIVE_LIMIT` | `usize` (≥ 1) | `active_limit` |
//! | `MULTIACTIVE_HARD_LIMIT` | `bool` | `hard_limit` |
//! | `MULTIACTIVE_HOSTING_POLICY` | `fifo` / `same-session` | `hosting` |
//! | `MULTIACTIVE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `MULTIACTIVE_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |

use super::config::{ExecutorConfig, HostingPolicy};
use crate::error::ConfigError;
use std::time::Duration;

/// Environment variable name for the active limit.
pub const ENV_ACTIVE_LIMIT: &str = "MULTIACTIVE_ACTIVE_LIMIT";
/// Environment variable name for the hard-limit toggle.
pub const ENV_HARD_LIMIT: &str = "MULTIACTIVE_HARD_LIMIT";
/// Environment variable name for the hosting policy.
pub const ENV_HOSTING_POLICY: &str = "MULTIACTIVE_HOSTING_POLICY";
/// Environment variable name for the thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "MULTIACTIVE_THREAD_NAME_PREFIX";
/// Environment variable name for the idle timeout in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "MULTIACTIVE_IDLE_TIMEOUT_MS";

/// Apply environment variable overrides to an [`ExecutorConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut ExecutorConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_ACTIVE_LIMIT) {
        config.active_limit = parse_limit(ENV_ACTIVE_LIMIT, &val)?;
    }
    if let Some(val) = read_env(ENV_HARD_LIMIT) {
        config.hard_limit = parse_bool(ENV_HARD_LIMIT, &val)?;
    }
    if let Some(val) = read_env(ENV_HOSTING_POLICY) {
        config.hosting = parse_policy(ENV_HOSTING_POLICY, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_IDLE_TIMEOUT_MS) {
        config.idle_timeout = Duration::from_millis(parse_u64(ENV_IDLE_TIMEOUT_MS, &val)?);
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var: &str, val: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: val.to_string(),
        expected,
    }
}

fn parse_limit(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    match val.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(invalid(var_name, val, "integer of at least 1")),
        Ok(n) => Ok(n),
    }
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| invalid(var_name, val, "unsigned integer"))
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(var_name, val, "bool (true/false/1/0/yes/no)")),
    }
}

fn parse_policy(var_name: &str, val: &str) -> Result<HostingPolicy, ConfigError> {
    val.parse::<HostingPolicy>()
        .map_err(|_| invalid(var_name, val, "fifo or same-session"))
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable executor configuration.
///
/// ```toml
/// [executor]
/// active_limit = 4
/// hard_limit = true
/// hosting_policy = "same-session"
/// thread_name_prefix = "orders"
/// idle_timeout_ms = 30000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ExecutorTomlConfig {
    /// Executor settings.
    #[serde(default)]
    pub executor: ExecutorToml,
}

/// Executor section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ExecutorToml {
    /// Maximum number of active requests.
    pub active_limit: Option<usize>,
    /// Cap serving threads at the active limit.
    pub hard_limit: Option<bool>,
    /// `fifo` or `same-session`.
    pub hosting_policy: Option<String>,
    /// Name prefix for serving threads.
    pub thread_name_prefix: Option<String>,
    /// Idle timeout of serving threads in milliseconds.
    pub idle_timeout_ms: Option<u64>,
}

/// Apply a parsed TOML config to an [`ExecutorConfig`].
///
/// Only fields that are present in the file override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    config: &mut ExecutorConfig,
    toml: &ExecutorTomlConfig,
) -> Result<(), ConfigError> {
    let section = &toml.executor;
    if let Some(v) = section.active_limit {
        if v == 0 {
            return Err(ConfigError::InvalidLimit {
                name: "active_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        config.active_limit = v;
    }
    if let Some(v) = section.hard_limit {
        config.hard_limit = v;
    }
    if let Some(ref v) = section.hosting_policy {
        config.hosting = parse_policy("executor.hosting_policy", v)?;
    }
    if let Some(ref v) = section.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = section.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(v);
    }
    Ok(())
}

/// Parse a TOML string into an [`ExecutorTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<ExecutorTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into an [`ExecutorTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<ExecutorTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
