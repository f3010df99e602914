//! Unit tests for `JsonlAuditWriter`.
//!
//! Validates JSONL record writing, automatic directory creation, day files
//! chosen by record date, append semantics across writer instances, and
//! concurrent write safety.

use std::fs;
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};

use action_relay::audit::writer::JsonlAuditWriter;
use action_relay::audit::{AuditLog, AuditRecord};

fn record(content: &str) -> AuditRecord {
    AuditRecord::new("proj-1".into(), "prompt-1".into(), content.into())
}

fn today_file(dir: &std::path::Path) -> std::path::PathBuf {
    dir.join(format!("audit-{}.jsonl", Utc::now().date_naive()))
}

fn record_on(content: &str, year: i32, month: u32, day: u32) -> AuditRecord {
    AuditRecord {
        created_at: Utc
            .with_ymd_and_hms(year, month, day, 23, 59, 0)
            .single()
            .expect("valid timestamp"),
        ..record(content)
    }
}

fn read_records(path: &std::path::Path) -> Vec<AuditRecord> {
    fs::read_to_string(path)
        .expect("audit file")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

// ── Directory handling ───────────────────────────────────────────────────────

#[tokio::test]
async fn open_creates_directory_if_missing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_dir = temp.path().join("nested").join("audit");
    assert!(!log_dir.exists());

    JsonlAuditWriter::open(log_dir.clone())
        .await
        .expect("open creates directory");
    assert!(log_dir.is_dir());
}

#[tokio::test]
async fn open_fails_when_path_is_a_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("occupied");
    fs::write(&file, "x").expect("write");

    let err = JsonlAuditWriter::open(file).await.err().expect("must fail");
    assert!(err.to_string().starts_with("io:"), "{err}");
}

// ── Record format ────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_writes_one_json_line_per_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::open(temp.path().to_path_buf())
        .await
        .expect("writer");

    let first = record("file src/a.js updated");
    let second = record("command executed: npm install");
    writer.append(&first).await.expect("first append");
    writer.append(&second).await.expect("second append");

    let records = read_records(&today_file(temp.path()));
    assert_eq!(records, vec![first, second]);
}

#[tokio::test]
async fn second_writer_appends_to_same_file() {
    let temp = tempfile::tempdir().expect("tempdir");

    let a = record("a");
    JsonlAuditWriter::open(temp.path().to_path_buf())
        .await
        .expect("writer")
        .append(&a)
        .await
        .expect("append");

    let b = record("b");
    JsonlAuditWriter::open(temp.path().to_path_buf())
        .await
        .expect("writer")
        .append(&b)
        .await
        .expect("append");

    let contents: Vec<String> = read_records(&today_file(temp.path()))
        .into_iter()
        .map(|r| r.content)
        .collect();
    assert_eq!(contents, vec!["a", "b"]);
}

// ── Day files ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn record_date_selects_day_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::open(temp.path().to_path_buf())
        .await
        .expect("writer");

    let first = record_on("file a updated", 2024, 2, 28);
    let second = record_on("file b updated", 2024, 2, 29);
    let third = record_on("file c updated", 2024, 2, 28);
    for r in [&first, &second, &third] {
        writer.append(r).await.expect("append");
    }

    let feb_28 = writer.path_for(NaiveDate::from_ymd_opt(2024, 2, 28).expect("date"));
    let feb_29 = writer.path_for(NaiveDate::from_ymd_opt(2024, 2, 29).expect("date"));
    assert_eq!(feb_28, temp.path().join("audit-2024-02-28.jsonl"));
    assert_eq!(read_records(&feb_28), vec![first, third]);
    assert_eq!(read_records(&feb_29), vec![second]);
}

#[tokio::test]
async fn failed_open_does_not_poison_later_appends() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::open(temp.path().to_path_buf())
        .await
        .expect("writer");
    let blocked = writer.path_for(NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"));
    fs::create_dir(&blocked).expect("occupy day file path");

    let err = writer
        .append(&record_on("x", 2024, 3, 1))
        .await
        .expect_err("directory in place of file");
    assert!(err.to_string().starts_with("io:"), "{err}");

    let ok = record("after failure");
    writer.append(&ok).await.expect("append");
    assert_eq!(read_records(&today_file(temp.path())), vec![ok]);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_produce_valid_jsonl() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = Arc::new(
        JsonlAuditWriter::open(temp.path().to_path_buf())
            .await
            .expect("writer"),
    );

    let mut handles = Vec::new();
    for i in 0..20 {
        let writer = Arc::clone(&writer);
        handles.push(tokio::spawn(async move {
            writer
                .append(&record(&format!("command executed: job {i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("append");
    }

    assert_eq!(read_records(&today_file(temp.path())).len(), 20);
}
