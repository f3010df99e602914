//! Relay wire envelopes.
//!
//! Outbound messages share one shape:
//!
//! ```json
//! {"event":"admin","data":{"type":"update-file","path":"/home/project/a.txt","content":"hi"}}
//! ```
//!
//! Inbound messages are `{"event": ..., "data": {...}}`. When `data.id` is a
//! string it is the correlation key of the request being answered.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{AppError, Result};

/// Event name carried by every outbound envelope.
pub const ADMIN_EVENT: &str = "admin";

/// Field of an inbound `data` object holding the correlation key.
pub const CORRELATION_FIELD: &str = "id";

/// Instruction type sent to the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdminKind {
    /// Materialize `content` at `path`.
    UpdateFile,
    /// Run `content` as a shell command.
    Command,
    /// A generation for prompt `id` is starting.
    PromptStart,
    /// The generation for prompt `id` has ended.
    PromptEnd,
}

/// Payload of an outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminPayload {
    /// Instruction type.
    #[serde(rename = "type")]
    pub kind: AdminKind,
    /// File content or command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Absolute sandbox path for file updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Correlation key for request-style messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Outbound message to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Always [`ADMIN_EVENT`] for messages built here.
    pub event: String,
    /// Instruction payload.
    pub data: AdminPayload,
}

impl RelayEnvelope {
    fn admin(kind: AdminKind) -> Self {
        Self {
            event: ADMIN_EVENT.to_owned(),
            data: AdminPayload {
                kind,
                content: None,
                path: None,
                id: None,
            },
        }
    }

    /// Write `content` to the absolute sandbox `path`.
    #[must_use]
    pub fn update_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        let mut env = Self::admin(AdminKind::UpdateFile);
        env.data.path = Some(path.into());
        env.data.content = Some(content.into());
        env
    }

    /// Run one shell command.
    #[must_use]
    pub fn command(command: impl Into<String>) -> Self {
        let mut env = Self::admin(AdminKind::Command);
        env.data.content = Some(command.into());
        env
    }

    /// Announce the start of a generation for `prompt_id`.
    #[must_use]
    pub fn prompt_start(prompt_id: impl Into<String>) -> Self {
        Self::admin(AdminKind::PromptStart).with_id(prompt_id)
    }

    /// Announce the end of a generation for `prompt_id`.
    #[must_use]
    pub fn prompt_end(prompt_id: impl Into<String>) -> Self {
        Self::admin(AdminKind::PromptEnd).with_id(prompt_id)
    }

    /// Tag this message with a correlation key.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.data.id = Some(id.into());
        self
    }

    /// Serialize to a single NDJSON line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Relay` if serialization fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Relay(format!("failed to serialise outbound message: {e}")))
    }
}

/// Inbound message from the sandbox.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboundEnvelope {
    /// Event name chosen by the sandbox.
    pub event: String,
    /// Event payload; `Value::Null` when absent.
    #[serde(default)]
    pub data: Value,
}

impl InboundEnvelope {
    /// Correlation key this message answers, if any.
    #[must_use]
    pub fn correlation_key(&self) -> Option<&str> {
        self.data.get(CORRELATION_FIELD).and_then(Value::as_str)
    }

    /// `data.diff` of a reply, if present.
    #[must_use]
    pub fn diff(&self) -> Option<&str> {
        self.data.get("diff").and_then(Value::as_str)
    }

    /// `data.result` of a reply, if present.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.data.get("result")
    }
}

/// Parse a single NDJSON line from the relay connection.
///
/// # Return value
///
/// - `Ok(Some(envelope))` for a well-formed message.
/// - `Ok(None)` for a blank line.
/// - `Err(AppError::Relay(...))` for text that is not a JSON envelope.
///
/// # Errors
///
/// Returns `AppError::Relay("malformed json: …")` when the line cannot be
/// decoded.
pub fn parse_inbound_line(line: &str) -> Result<Option<InboundEnvelope>> {
    if line.trim().is_empty() {
        debug!("relay reader: skipping blank line");
        return Ok(None);
    }

    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| AppError::Relay(format!("malformed json: {e}")))
}
