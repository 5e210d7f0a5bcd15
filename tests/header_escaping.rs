//! Header escaping on the wire.
//!
//! From protocol 1.1 on, header names and values escape:
//! - `\\` for backslash (0x5c)
//! - `\n` for line feed (0x0a)
//! - `\c` for colon (0x3a)
//!
//! Protocol 1.0 frames and CONNECT/STOMP frames are written literally.

use bytes::BytesMut;
use osmium_stomp::codec::{StompCodec, StompItem};
use osmium_stomp::{Frame, Protocol, escape};
use tokio_util::codec::{Decoder, Encoder};

fn decode_one(protocol: Protocol, raw: &[u8]) -> Frame {
    let mut codec = StompCodec::with_protocol(protocol);
    let mut buf = BytesMut::from(raw);
    match codec.decode(&mut buf).unwrap() {
        Some(StompItem::Frame(f)) => f,
        other => panic!("expected frame, got {:?}", other),
    }
}

fn encode_one(protocol: Protocol, frame: Frame) -> String {
    let mut codec = StompCodec::with_protocol(protocol);
    let mut buf = BytesMut::new();
    codec.encode(StompItem::Frame(frame), &mut buf).unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

// ============================================================================
// escape::encode / escape::decode
// ============================================================================

#[test]
fn encode_all_three() {
    assert_eq!(escape::encode("a\\b"), "a\\\\b");
    assert_eq!(escape::encode("l1\nl2"), "l1\\nl2");
    assert_eq!(escape::encode("host:port"), "host\\cport");
    assert_eq!(escape::encode("plain"), "plain");
    assert_eq!(escape::encode(""), "");
}

#[test]
fn backslash_goes_first() {
    // a literal backslash-n must not collapse into a newline on the way back
    let original = "\\n";
    let wire = escape::encode(original);
    assert_eq!(wire, "\\\\n");
    assert_eq!(escape::decode(&wire), original);
}

#[test]
fn decode_is_best_effort() {
    assert_eq!(escape::decode("a\\tb"), "a\\tb");
    assert_eq!(escape::decode("trailing\\"), "trailing\\");
    assert_eq!(escape::decode("cr\\r"), "cr\\r");
}

#[test]
fn round_trip_mixed() {
    for s in ["", ":", "\n\n", "\\\\", "a:b\nc\\d", "k\\cv", "ünïcödé:ok"] {
        assert_eq!(escape::decode(&escape::encode(s)), s, "input {:?}", s);
    }
}

// ============================================================================
// Decoding incoming frames
// ============================================================================

#[test]
fn unescapes_keys_and_values_from_1_1() {
    let f = decode_one(
        Protocol::V1_1,
        b"MESSAGE\nkey\\cname:line1\\nline2\\\\end\n\n\0",
    );
    assert_eq!(f.get_header("key:name"), Some("line1\nline2\\end"));
}

#[test]
fn literal_on_1_0() {
    let f = decode_one(Protocol::V1_0, b"MESSAGE\nheader:a\\cb\n\n\0");
    assert_eq!(f.get_header("header"), Some("a\\cb"));
}

#[test]
fn destination_with_colon() {
    let f = decode_one(
        Protocol::V1_2,
        b"MESSAGE\ndestination:/queue/a\\cb\nsubscription:1\n\n\0",
    );
    assert_eq!(f.get_header("destination"), Some("/queue/a:b"));
}

// ============================================================================
// Encoding outgoing frames
// ============================================================================

#[test]
fn escapes_on_1_2() {
    let wire = encode_one(
        Protocol::V1_2,
        Frame::new("SEND")
            .header("destination", "/queue/a:b")
            .header("note", "x\ny"),
    );
    assert!(wire.contains("destination:/queue/a\\cb\n"));
    assert!(wire.contains("note:x\\ny\n"));
}

#[test]
fn connect_is_never_escaped() {
    for command in ["CONNECT", "STOMP"] {
        let wire = encode_one(
            Protocol::V1_2,
            Frame::new(command).header("passcode", "p:w\\d"),
        );
        assert!(wire.contains("passcode:p:w\\d\n"), "{}", wire);
    }
}

#[test]
fn body_is_never_escaped() {
    let wire = encode_one(
        Protocol::V1_2,
        Frame::new("SEND")
            .header("destination", "/q")
            .set_body(b"a:b\\c".to_vec()),
    );
    assert!(wire.ends_with("\n\na:b\\c\0"));
}
