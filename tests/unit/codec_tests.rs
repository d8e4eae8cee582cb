//! Unit tests for the NDJSON line codec.
//!
//! Covers:
//! - single message decodes without its newline
//! - batched messages decode one per call
//! - partial lines stay buffered until the newline arrives
//! - oversized lines return `AppError::Agent("line too long …")`
//! - encoding appends exactly one newline

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use agent_relay::acp::codec::{NdjsonCodec, MAX_LINE_BYTES};
use agent_relay::AppError;

// ── Single message decodes without its newline ───────────────────────────────

#[test]
fn single_message_decodes_without_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"result\",\"subtype\":\"success\"}\n");

    let decoded = codec
        .decode(&mut buf)
        .expect("decode must succeed for a valid NDJSON line");

    assert_eq!(
        decoded,
        Some("{\"type\":\"result\",\"subtype\":\"success\"}".to_owned()),
        "codec must return the line content without the trailing newline"
    );
}

// ── Batched messages decode one per call ─────────────────────────────────────

#[test]
fn batched_messages_decode_one_per_call() {
    let mut codec = NdjsonCodec::new();
    let raw = concat!(
        "{\"type\":\"assistant\",\"message\":{\"content\":[]}}\n",
        "{\"type\":\"result\",\"subtype\":\"success\"}\n",
    );
    let mut buf = BytesMut::from(raw);

    assert!(
        codec.decode(&mut buf).expect("first decode").is_some(),
        "first line must decode"
    );
    assert!(
        codec.decode(&mut buf).expect("second decode").is_some(),
        "second line must decode"
    );
    assert!(
        codec.decode(&mut buf).expect("third decode").is_none(),
        "no further lines must be present"
    );
}

// ── Partial lines stay buffered ──────────────────────────────────────────────

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = NdjsonCodec::new();

    let mut buf = BytesMut::from("{\"type\":\"assist");
    assert!(
        codec
            .decode(&mut buf)
            .expect("partial decode must not error")
            .is_none(),
        "partial line must not be emitted before its newline arrives"
    );

    buf.extend_from_slice(b"ant\",\"message\":{\"content\":[]}}\n");
    assert!(
        codec
            .decode(&mut buf)
            .expect("decode after newline")
            .is_some(),
        "complete line must be emitted once the newline arrives"
    );
}

// ── Oversized lines are rejected ─────────────────────────────────────────────

#[test]
fn oversized_line_returns_error() {
    let mut codec = NdjsonCodec::new();
    let big_line = "a".repeat(MAX_LINE_BYTES + 1) + "\n";
    let mut buf = BytesMut::from(big_line.as_str());

    match codec.decode(&mut buf) {
        Err(AppError::Agent(msg)) => assert!(
            msg.contains("line too long"),
            "error must mention 'line too long', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Agent), got: {other:?}"),
    }
}

// ── Encoding appends exactly one newline ─────────────────────────────────────

#[test]
fn encode_appends_single_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("{\"ok\":true}".to_owned(), &mut buf)
        .expect("encode must succeed");

    assert_eq!(&buf[..], b"{\"ok\":true}\n");
}
