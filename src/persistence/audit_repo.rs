//! Audit record repository for `SQLite` persistence.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;

use crate::audit::{AuditLog, AuditRecord};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for append-only audit records.
#[derive(Clone)]
pub struct AuditRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    project_id: String,
    prompt_id: String,
    content: String,
    created_at: String,
}

impl AuditRow {
    fn into_record(self) -> Result<AuditRecord> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(AuditRecord {
            id: self.id,
            project_id: self.project_id,
            prompt_id: self.prompt_id,
            content: self.content,
            created_at,
        })
    }
}

impl AuditRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new audit record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_record (id, project_id, prompt_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&record.id)
        .bind(&record.project_id)
        .bind(&record.prompt_id)
        .bind(&record.content)
        .bind(record.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Fetch all records written for a prompt, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_prompt(&self, prompt_id: &str) -> Result<Vec<AuditRecord>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, project_id, prompt_id, content, created_at
             FROM audit_record
             WHERE prompt_id = ?1
             ORDER BY rowid ASC",
        )
        .bind(prompt_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(AuditRow::into_record).collect()
    }

    /// Fetch all records for a project, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<AuditRecord>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, project_id, prompt_id, content, created_at
             FROM audit_record
             WHERE project_id = ?1
             ORDER BY rowid ASC",
        )
        .bind(project_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(AuditRow::into_record).collect()
    }
}

impl AuditLog for AuditRepo {
    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.insert(record))
    }
}
