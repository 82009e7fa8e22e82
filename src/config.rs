//! Protocol configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::server::runs::DEFAULT_FINISHED_RUN_RETENTION;
use crate::shared::channel::{DEFAULT_INLINE_ARGUMENT_LIMIT, DEFAULT_SIDE_CHANNEL_ENV_VAR};
use crate::types::DEFAULT_WORKER_MODULE;

/// Prefix of environment variables that override file configuration.
pub const ENV_PREFIX: &str = "STEPWIRE_";

/// Settings shared by the orchestrator and worker sides of the protocol.
///
/// Usually loaded from a `stepwire.toml` file.
///
/// # Example Configuration File
///
/// ```toml
/// inline_argument_limit = 65536
/// worker_module = "my_runtime.worker"
/// spawn_timeout_ms = 600000
/// current_image = "registry.local/etl:42"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Largest step payload, in bytes, passed as a command-line argument.
    #[serde(default = "default_inline_argument_limit")]
    pub inline_argument_limit: usize,

    /// Environment variable carrying compressed step payloads.
    #[serde(default = "default_compressed_args_env_var")]
    pub compressed_args_env_var: String,

    /// Module a runtime executable is launched with when an origin names no
    /// explicit entry point.
    #[serde(default = "default_worker_module")]
    pub worker_module: String,

    /// How long a spawned worker may run. `None` waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_timeout_ms: Option<u64>,

    /// Image this worker runs in, reported to the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_image: Option<String>,

    /// Finished runs a worker remembers so that `resume` and repeated
    /// `cancel` calls still get an answer.
    #[serde(default = "default_finished_run_retention")]
    pub finished_run_retention: usize,
}

fn default_inline_argument_limit() -> usize {
    DEFAULT_INLINE_ARGUMENT_LIMIT
}

fn default_compressed_args_env_var() -> String {
    DEFAULT_SIDE_CHANNEL_ENV_VAR.to_string()
}

fn default_worker_module() -> String {
    DEFAULT_WORKER_MODULE.to_string()
}

fn default_finished_run_retention() -> usize {
    DEFAULT_FINISHED_RUN_RETENTION
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            inline_argument_limit: default_inline_argument_limit(),
            compressed_args_env_var: default_compressed_args_env_var(),
            worker_module: default_worker_module(),
            spawn_timeout_ms: None,
            current_image: None,
            finished_run_retention: default_finished_run_retention(),
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply `STEPWIRE_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `STEPWIRE_*` overrides read through `lookup`.
    ///
    /// Recognized variables: `STEPWIRE_INLINE_ARGUMENT_LIMIT`,
    /// `STEPWIRE_COMPRESSED_ARGS_ENV_VAR`, `STEPWIRE_WORKER_MODULE`,
    /// `STEPWIRE_SPAWN_TIMEOUT_MS`, `STEPWIRE_CURRENT_IMAGE`,
    /// `STEPWIRE_FINISHED_RUN_RETENTION`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(limit) = var("INLINE_ARGUMENT_LIMIT") {
            self.inline_argument_limit = parse_number("INLINE_ARGUMENT_LIMIT", &limit)?;
        }
        if let Some(name) = var("COMPRESSED_ARGS_ENV_VAR") {
            self.compressed_args_env_var = name;
        }
        if let Some(module) = var("WORKER_MODULE") {
            self.worker_module = module;
        }
        if let Some(timeout) = var("SPAWN_TIMEOUT_MS") {
            self.spawn_timeout_ms = Some(parse_number("SPAWN_TIMEOUT_MS", &timeout)?);
        }
        if let Some(image) = var("CURRENT_IMAGE") {
            self.current_image = Some(image);
        }
        if let Some(retention) = var("FINISHED_RUN_RETENTION") {
            self.finished_run_retention = parse_number("FINISHED_RUN_RETENTION", &retention)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.compressed_args_env_var.trim().is_empty() {
            return Err(Error::Config(
                "compressed_args_env_var must not be empty".to_string(),
            ));
        }
        if self.worker_module.trim().is_empty() {
            return Err(Error::Config("worker_module must not be empty".to_string()));
        }
        Ok(())
    }

    /// Spawn timeout as a [`Duration`].
    pub fn spawn_timeout(&self) -> Option<Duration> {
        self.spawn_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_number<T: std::str::FromStr>(suffix: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{ENV_PREFIX}{suffix} is not a number: {raw:?}")))
}
