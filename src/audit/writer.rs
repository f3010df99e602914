//! Audit records as JSON lines, one file per day.
//!
//! A record lands in `<dir>/audit-YYYY-MM-DD.jsonl`, named after the UTC
//! date of its `created_at`. All file I/O goes through `tokio::fs`, and a
//! single async lock serializes appends so lines never interleave.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::NaiveDate;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AuditLog, AuditRecord};
use crate::{AppError, Result};

/// The file currently receiving appends.
struct DayFile {
    date: NaiveDate,
    file: File,
}

/// [`AuditLog`] backed by daily JSONL files.
pub struct JsonlAuditWriter {
    dir: PathBuf,
    current: Mutex<Option<DayFile>>,
}

impl JsonlAuditWriter {
    /// Prepare `dir` (created if missing) to receive audit files.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Io(format!("cannot create audit directory {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    /// File that holds the records created on `date`.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        day_path(&self.dir, date)
    }

    async fn write_line(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| {
            AppError::Io(format!("cannot encode audit record {}: {e}", record.id))
        })?;
        line.push(b'\n');
        let date = record.created_at.date_naive();

        let mut current = self.current.lock().await;
        let day = match current.take() {
            Some(day) if day.date == date => day,
            _ => open_day(&self.dir, date).await?,
        };
        let day = current.insert(day);

        day.file.write_all(&line).await?;
        day.file.flush().await?;
        debug!(
            record_id = %record.id,
            prompt_id = %record.prompt_id,
            "audit: record appended"
        );
        Ok(())
    }
}

fn day_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("audit-{date}.jsonl"))
}

async fn open_day(dir: &Path, date: NaiveDate) -> Result<DayFile> {
    let path = day_path(dir, date);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| AppError::Io(format!("cannot open audit file {}: {e}", path.display())))?;
    debug!(path = %path.display(), "audit: switched to day file");
    Ok(DayFile { date, file })
}

impl AuditLog for JsonlAuditWriter {
    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.write_line(record).await.inspect_err(|e| {
                warn!(error = %e, prompt_id = %record.prompt_id, "audit: append failed");
            })
        })
    }
}
