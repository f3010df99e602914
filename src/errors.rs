//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// A complete action block whose opening marker or fields failed to parse.
    MalformedBlock(String),
    /// The parse buffer grew past its configured bound without yielding a block.
    BufferLimit(String),
    /// Relay framing, serialization, or queueing failure.
    Relay(String),
    /// A correlated relay exchange received no reply before its deadline.
    Timeout(String),
    /// The relay connection dropped or the channel was shut down.
    ChannelClosed(String),
    /// A correlation key is already in use by a pending exchange.
    DuplicateKey(String),
    /// An action handler failed while performing its side effects.
    Handler(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl AppError {
    /// Whether this error reports a malformed action block.
    ///
    /// Malformed blocks are retried by the extractor on the next call, so
    /// stream-processing loops treat them as recoverable.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedBlock(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::MalformedBlock(msg) => write!(f, "malformed block: {msg}"),
            Self::BufferLimit(msg) => write!(f, "buffer limit: {msg}"),
            Self::Relay(msg) => write!(f, "relay: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ChannelClosed(msg) => write!(f, "channel closed: {msg}"),
            Self::DuplicateKey(msg) => write!(f, "duplicate key: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
