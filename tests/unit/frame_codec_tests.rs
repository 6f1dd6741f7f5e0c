//! Unit tests for the NDJSON frame codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use fork_session::ipc::codec::{FrameCodec, MAX_FRAME_BYTES};
use fork_session::ForkError;

/// A complete line decodes to its content without the newline.
#[test]
fn single_frame_decodes() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"version\":1}\n");

    let frame = codec.decode(&mut buf).expect("decode must succeed");
    assert_eq!(frame, Some("{\"version\":1}".to_owned()));
}

/// A frame split across reads is held back until its newline arrives.
#[test]
fn partial_frame_is_buffered() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"version\"");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);

    buf.extend_from_slice(b":1}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some("{\"version\":1}".to_owned())
    );
}

/// Back-to-back frames decode one per call.
#[test]
fn batched_frames_decode_in_order() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("first\nsecond\n");

    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("first".into()));
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("second".into()));
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
}

/// An oversized frame is a protocol error, not an unbounded allocation.
#[test]
fn oversized_frame_is_rejected() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("a".repeat(MAX_FRAME_BYTES + 16).as_str());

    let err = codec.decode(&mut buf).expect_err("oversized frame must fail");
    match err {
        ForkError::Protocol(msg) => assert!(msg.contains("frame too long"), "message: {msg}"),
        other => panic!("expected Protocol, got {other:?}"),
    }
}

/// Encoding appends exactly one newline.
#[test]
fn encode_appends_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("{\"id\":\"x\"}".to_owned(), &mut buf)
        .expect("encode must succeed");
    assert_eq!(&buf[..], b"{\"id\":\"x\"}\n");
}

/// A trailing frame without newline is still delivered at end of stream.
#[test]
fn final_frame_without_newline_is_flushed_at_eof() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("tail");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode_eof"),
        Some("tail".to_owned())
    );
}
