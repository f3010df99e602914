//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `IF NOT EXISTS`, so the bootstrap is safe to re-run
//! on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS audit_record (
    id              TEXT PRIMARY KEY NOT NULL,
    project_id      TEXT NOT NULL,
    prompt_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_prompt ON audit_record(prompt_id);
CREATE INDEX IF NOT EXISTS idx_audit_project ON audit_record(project_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
