//! Unit tests for the relay NDJSON codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use action_relay::relay::codec::{RelayCodec, DEFAULT_MAX_LINE_BYTES};
use action_relay::AppError;

#[test]
fn decodes_one_line_without_newline() {
    let mut codec = RelayCodec::default();
    let mut buf = BytesMut::from("{\"event\":\"ready\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some("{\"event\":\"ready\"}".to_owned())
    );
    assert!(buf.is_empty());
}

#[test]
fn partial_line_is_buffered() {
    let mut codec = RelayCodec::default();
    let mut buf = BytesMut::from("{\"event\":");
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);

    buf.extend_from_slice(b"\"ready\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some("{\"event\":\"ready\"}")
    );
}

#[test]
fn batched_lines_decode_in_order() {
    let mut codec = RelayCodec::default();
    let mut buf = BytesMut::from("a\nb\n");
    assert_eq!(codec.decode(&mut buf).expect("first").as_deref(), Some("a"));
    assert_eq!(codec.decode(&mut buf).expect("second").as_deref(), Some("b"));
    assert_eq!(codec.decode(&mut buf).expect("empty"), None);
}

#[test]
fn overlong_line_is_relay_error() {
    let mut codec = RelayCodec::new(8);
    let mut buf = BytesMut::from("0123456789abcdef\n");
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(
        matches!(err, AppError::Relay(ref msg) if msg.starts_with("line too long")),
        "got {err}"
    );
}

#[test]
fn codec_recovers_after_overlong_line() {
    let mut codec = RelayCodec::new(8);
    let mut buf = BytesMut::from("0123456789abcdef\nok\n");
    assert!(codec.decode(&mut buf).is_err());

    let mut next = None;
    for _ in 0..3 {
        if let Ok(Some(line)) = codec.decode(&mut buf) {
            next = Some(line);
            break;
        }
    }
    assert_eq!(next.as_deref(), Some("ok"));
}

#[test]
fn encode_appends_newline() {
    let mut codec = RelayCodec::default();
    let mut dst = BytesMut::new();
    codec
        .encode("{\"event\":\"admin\"}".to_owned(), &mut dst)
        .expect("encode");
    assert_eq!(&dst[..], b"{\"event\":\"admin\"}\n");
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(DEFAULT_MAX_LINE_BYTES, 1_048_576);
}
