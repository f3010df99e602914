//! Unit tests for relay envelope serialization and inbound parsing.

use serde_json::json;

use action_relay::relay::envelope::parse_inbound_line;
use action_relay::relay::{AdminKind, RelayEnvelope};
use action_relay::AppError;

fn to_value(env: &RelayEnvelope) -> serde_json::Value {
    serde_json::from_str(&env.to_line().expect("serialize")).expect("valid json")
}

// ── Outbound ─────────────────────────────────────────────────────────────────

#[test]
fn update_file_wire_shape() {
    let env = RelayEnvelope::update_file("/home/project/a.txt", "hi");
    assert_eq!(env.data.kind, AdminKind::UpdateFile);
    assert_eq!(
        to_value(&env),
        json!({
            "event": "admin",
            "data": {"type": "update-file", "path": "/home/project/a.txt", "content": "hi"}
        })
    );
}

#[test]
fn command_wire_shape() {
    assert_eq!(
        to_value(&RelayEnvelope::command("npm install")),
        json!({"event": "admin", "data": {"type": "command", "content": "npm install"}})
    );
}

#[test]
fn prompt_markers_carry_prompt_id() {
    assert_eq!(
        to_value(&RelayEnvelope::prompt_start("p-1")),
        json!({"event": "admin", "data": {"type": "prompt-start", "id": "p-1"}})
    );
    assert_eq!(
        to_value(&RelayEnvelope::prompt_end("p-1")),
        json!({"event": "admin", "data": {"type": "prompt-end", "id": "p-1"}})
    );
}

#[test]
fn with_id_replaces_correlation_key() {
    let env = RelayEnvelope::command("ls").with_id("k1").with_id("k2");
    assert_eq!(env.data.id.as_deref(), Some("k2"));
}

#[test]
fn to_line_is_single_line() {
    let line = RelayEnvelope::update_file("/a", "line1\nline2")
        .to_line()
        .expect("serialize");
    assert!(!line.contains('\n'));
}

// ── Inbound ──────────────────────────────────────────────────────────────────

#[test]
fn parses_reply_with_correlation_key() {
    let env = parse_inbound_line(r#"{"event":"prompt-end","data":{"id":"p-1","diff":"+a"}}"#)
        .expect("parse")
        .expect("envelope");
    assert_eq!(env.event, "prompt-end");
    assert_eq!(env.correlation_key(), Some("p-1"));
    assert_eq!(env.diff(), Some("+a"));
    assert!(env.result().is_none());
}

#[test]
fn non_string_id_is_not_a_correlation_key() {
    let env = parse_inbound_line(r#"{"event":"x","data":{"id":7,"result":{"ok":true}}}"#)
        .expect("parse")
        .expect("envelope");
    assert_eq!(env.correlation_key(), None);
    assert_eq!(env.result(), Some(&json!({"ok": true})));
}

#[test]
fn missing_data_defaults_to_null() {
    let env = parse_inbound_line(r#"{"event":"heartbeat"}"#)
        .expect("parse")
        .expect("envelope");
    assert!(env.data.is_null());
    assert_eq!(env.correlation_key(), None);
}

#[test]
fn blank_line_is_skipped() {
    assert!(parse_inbound_line("   ").expect("parse").is_none());
}

#[test]
fn malformed_json_is_relay_error() {
    let err = parse_inbound_line("{not json").unwrap_err();
    assert!(matches!(err, AppError::Relay(ref msg) if msg.starts_with("malformed json")));
}
