use std::path::Path;
use std::time::Duration;

use action_relay::config::{AuditBackend, ExtractorConfig, RelayConfig};
use action_relay::{AppError, GlobalConfig};

fn sample_toml() -> String {
    r#"
[relay]
address = "10.0.0.5:7070"
reply_timeout_seconds = 45
queue_capacity = 64
reconnect_delay_ms = 250
max_line_bytes = 4096

[extractor]
max_buffer_bytes = 65536
max_malformed_retries = 5

[sandbox.roots]
node = "/home/project"
python = "/workspace"

[audit]
backend = "jsonl"
path = "logs/audit"
"#
    .to_owned()
}

fn minimal_toml() -> String {
    r#"
[relay]
address = "127.0.0.1:7070"

[sandbox.roots]
node = "/home/project"

[audit]
path = "data/audit.db"
"#
    .to_owned()
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");

    assert_eq!(config.relay.address, "10.0.0.5:7070");
    assert_eq!(config.relay.reply_timeout(), Duration::from_secs(45));
    assert_eq!(config.relay.queue_capacity, 64);
    assert_eq!(config.relay.reconnect_delay(), Duration::from_millis(250));
    assert_eq!(config.relay.max_line_bytes, 4096);
    assert_eq!(config.extractor.max_buffer_bytes, 65536);
    assert_eq!(config.extractor.max_malformed_retries, 5);
    assert_eq!(config.audit.backend, AuditBackend::Jsonl);
    assert_eq!(config.audit.path, Path::new("logs/audit"));
    assert_eq!(
        config.sandbox.root_for("python").expect("root"),
        Path::new("/workspace")
    );
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(&minimal_toml()).expect("valid config");

    let defaults = RelayConfig::default();
    assert_eq!(config.relay.reply_timeout_seconds, 30);
    assert_eq!(config.relay.queue_capacity, defaults.queue_capacity);
    assert_eq!(config.relay.reconnect_delay_ms, defaults.reconnect_delay_ms);
    assert_eq!(config.relay.max_line_bytes, 1_048_576);
    assert_eq!(config.extractor, ExtractorConfig::default());
    assert_eq!(config.extractor.max_buffer_bytes, 4 * 1_048_576);
    assert_eq!(config.extractor.max_malformed_retries, 3);
    assert_eq!(config.audit.backend, AuditBackend::Sqlite);
}

#[test]
fn unknown_project_type_is_not_found() {
    let config = GlobalConfig::from_toml_str(&minimal_toml()).expect("valid config");
    let err = config.sandbox.root_for("rust").unwrap_err();
    assert!(matches!(err, AppError::NotFound(ref msg) if msg.contains("rust")));
}

#[test]
fn zero_reply_timeout_is_rejected() {
    let raw = minimal_toml().replace(
        "address = \"127.0.0.1:7070\"",
        "address = \"127.0.0.1:7070\"\nreply_timeout_seconds = 0",
    );
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(err.to_string().contains("reply_timeout_seconds"), "{err}");
}

#[test]
fn zero_queue_capacity_is_rejected() {
    let raw = minimal_toml().replace(
        "address = \"127.0.0.1:7070\"",
        "address = \"127.0.0.1:7070\"\nqueue_capacity = 0",
    );
    assert!(matches!(
        GlobalConfig::from_toml_str(&raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn zero_extractor_bounds_are_rejected() {
    for section in [
        "[extractor]\nmax_buffer_bytes = 0\n",
        "[extractor]\nmax_malformed_retries = 0\n",
    ] {
        let raw = format!("{}\n{section}", minimal_toml());
        let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "{section}: {err}");
    }
}

#[test]
fn empty_sandbox_roots_are_rejected() {
    let raw = minimal_toml().replace("node = \"/home/project\"\n", "");
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(err.to_string().contains("sandbox.roots"), "{err}");
}

#[test]
fn empty_relay_address_is_rejected() {
    let raw = minimal_toml().replace("127.0.0.1:7070", " ");
    assert!(GlobalConfig::from_toml_str(&raw).is_err());
}

#[test]
fn unknown_audit_backend_is_rejected() {
    let raw = minimal_toml().replace("[audit]\n", "[audit]\nbackend = \"postgres\"\n");
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(err.to_string().starts_with("config:"), "{err}");
}

#[test]
fn missing_relay_section_is_rejected() {
    let raw = minimal_toml().replace("[relay]\naddress = \"127.0.0.1:7070\"\n", "");
    assert!(matches!(
        GlobalConfig::from_toml_str(&raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.relay.address, "10.0.0.5:7070");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let err = GlobalConfig::load_from_path("/nonexistent/action-relay.toml").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}
