//! Append-only audit trail for sandbox-affecting actions.
//!
//! Every dispatched `file` or `shell` action produces one [`AuditRecord`].
//! Two [`AuditLog`] implementations exist: [`JsonlAuditWriter`] (daily
//! JSONL files) and [`AuditRepo`](crate::persistence::audit_repo::AuditRepo)
//! (`SQLite`).

pub mod writer;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One human-readable record of a change made on behalf of a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record identifier.
    pub id: String,
    /// Project the change applies to.
    pub project_id: String,
    /// Prompt whose generation produced the change.
    pub prompt_id: String,
    /// Description such as `"file src/a.js updated"`.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Construct a new record stamped with the current time.
    #[must_use]
    pub fn new(project_id: String, prompt_id: String, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            prompt_id,
            content,
            created_at: Utc::now(),
        }
    }
}

/// Persists audit records. Records are only ever appended.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLog: Send + Sync {
    /// Append a single record.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>>;
}

pub use writer::JsonlAuditWriter;
