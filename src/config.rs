//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Connection settings for the sandbox relay.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// `host:port` of the sandbox relay endpoint.
    pub address: String,
    /// Default deadline for correlated request/response exchanges.
    #[serde(default = "default_reply_timeout_seconds")]
    pub reply_timeout_seconds: u64,
    /// Outbound messages buffered while the connection is down.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Delay between reconnection attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Maximum inbound frame length in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl RelayConfig {
    /// Reply deadline as a [`Duration`].
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_seconds)
    }

    /// Reconnection backoff as a [`Duration`].
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7070".into(),
            reply_timeout_seconds: default_reply_timeout_seconds(),
            queue_capacity: default_queue_capacity(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_reply_timeout_seconds() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    256
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

/// Bounds applied to each generation's parse buffer.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExtractorConfig {
    /// Upper bound on unconsumed buffered text.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    /// Failed parse attempts on one block before it is dropped.
    #[serde(default = "default_max_malformed_retries")]
    pub max_malformed_retries: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: default_max_buffer_bytes(),
            max_malformed_retries: default_max_malformed_retries(),
        }
    }
}

fn default_max_buffer_bytes() -> usize {
    4 * 1_048_576
}

fn default_max_malformed_retries() -> u32 {
    3
}

/// Sandbox layout: project type → root directory for materialized files.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    /// Root directory keyed by project type (e.g. `node`, `python`).
    pub roots: HashMap<String, PathBuf>,
}

impl SandboxConfig {
    /// Root directory for `project_type`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no root is configured for the type.
    pub fn root_for(&self, project_type: &str) -> Result<&Path> {
        self.roots
            .get(project_type)
            .map(PathBuf::as_path)
            .ok_or_else(|| {
                AppError::NotFound(format!("no sandbox root for project type '{project_type}'"))
            })
    }
}

/// Where audit records are persisted.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    /// `SQLite` database file.
    #[default]
    Sqlite,
    /// Daily-rotating JSONL files in a directory.
    Jsonl,
}

/// Audit persistence settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: AuditBackend,
    /// Database file (`sqlite`) or log directory (`jsonl`).
    pub path: PathBuf,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Sandbox relay connectivity.
    pub relay: RelayConfig,
    /// Parse-buffer bounds.
    #[serde(default)]
    pub extractor: ExtractorConfig,
    /// Sandbox directory layout.
    pub sandbox: SandboxConfig,
    /// Audit persistence.
    pub audit: AuditConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.relay.address.trim().is_empty() {
            return Err(AppError::Config("relay.address must not be empty".into()));
        }

        if self.relay.reply_timeout_seconds == 0 {
            return Err(AppError::Config(
                "relay.reply_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.relay.queue_capacity == 0 {
            return Err(AppError::Config(
                "relay.queue_capacity must be greater than zero".into(),
            ));
        }

        if self.extractor.max_buffer_bytes == 0 {
            return Err(AppError::Config(
                "extractor.max_buffer_bytes must be greater than zero".into(),
            ));
        }

        if self.extractor.max_malformed_retries == 0 {
            return Err(AppError::Config(
                "extractor.max_malformed_retries must be greater than zero".into(),
            ));
        }

        if self.sandbox.roots.is_empty() {
            return Err(AppError::Config("sandbox.roots must not be empty".into()));
        }

        Ok(())
    }
}
