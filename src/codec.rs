use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ConnError;
use crate::escape;
use crate::frame::{self, Frame};
use crate::headers::{self, Headers};
use crate::parser::parse_frame_slice;
use crate::protocol::Protocol;

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single LF on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF)
    Heartbeat,
}

/// Frame and byte counters shared between the codec and the I/O loops.
#[derive(Debug, Default)]
pub struct WireStats {
    pub frames_read: AtomicU64,
    pub bytes_read: AtomicU64,
    pub frames_written: AtomicU64,
    pub bytes_written: AtomicU64,
}

/// Point-in-time copy of [`WireStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    pub frames_read: u64,
    pub bytes_read: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
}

impl WireStats {
    pub fn snapshot(&self) -> ConnStats {
        ConnStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into `StompItem::Frame` or `StompItem::Heartbeat`,
///   unescaping header keys and values when the protocol is 1.1 or later.
/// - Honour `content-length` for bodies containing NUL bytes.
/// - Encode frames back to bytes, inserting `content-length` and escaping
///   headers (never for 1.0 or CONNECT/STOMP frames), and strip the
///   client-local extension headers.
#[derive(Debug, Clone, Default)]
pub struct StompCodec {
    protocol: Protocol,
    trim_leading_nul: bool,
    stats: Option<Arc<WireStats>>,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec for an already negotiated protocol level.
    pub fn with_protocol(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    /// Discard stray NUL bytes in front of a command line when decoding.
    pub fn trim_leading_nul(mut self, enabled: bool) -> Self {
        self.trim_leading_nul = enabled;
        self
    }

    /// Count encoded and decoded bytes into `stats`.
    pub fn with_stats(mut self, stats: Arc<WireStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    fn count_read(&self, n: usize) {
        if let Some(stats) = &self.stats {
            stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    fn count_written(&self, n: usize) {
        if let Some(stats) = &self.stats {
            stats.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    fn decode_header_part(&self, raw: Vec<u8>) -> Result<String, ConnError> {
        let s = String::from_utf8(raw).map_err(|e| ConnError::HeaderUtf8(e.to_string()))?;
        if self.protocol.escapes_headers() {
            Ok(escape::decode(&s))
        } else {
            Ok(s)
        }
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = ConnError;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are
    /// required to decode a complete item.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.trim_leading_nul {
            let nuls = src.iter().take_while(|&&b| b == 0).count();
            if nuls > 0 {
                src.advance(nuls);
                self.count_read(nuls);
            }
        }

        // heartbeat: LF, or CRLF
        match src.chunk() {
            [b'\n', ..] => {
                src.advance(1);
                self.count_read(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r', b'\n', ..] => {
                src.advance(2);
                self.count_read(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            [] | [b'\r'] => return Ok(None),
            _ => {}
        }

        let Some(parsed) = parse_frame_slice(src.chunk())? else {
            return Ok(None);
        };
        src.advance(parsed.consumed);
        self.count_read(parsed.consumed);

        let mut headers = Headers::new();
        for (k, v) in parsed.headers {
            let key = self.decode_header_part(k)?;
            let value = self.decode_header_part(v)?;
            headers.push(key, value);
        }

        Ok(Some(StompItem::Frame(Frame {
            command: parsed.command,
            headers,
            body: parsed.body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = ConnError;

    /// Encode a `StompItem` into the provided destination buffer.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
            }
            StompItem::Frame(frame) => {
                let is_connect = frame.command == frame::CONNECT || frame.command == frame::STOMP;
                let literal = is_connect || !self.protocol.escapes_headers();

                let mut headers = frame.headers.without_client_local();
                if !is_connect
                    && !frame.headers.contains(headers::SUPPRESS_CONTENT_LENGTH)
                    && !headers.contains(headers::CONTENT_LENGTH)
                {
                    headers.push(headers::CONTENT_LENGTH, frame.body.len().to_string());
                }

                dst.reserve(frame.command.len() + frame.body.len() + 64);
                dst.extend_from_slice(frame.command.as_bytes());
                dst.put_u8(b'\n');
                for (k, v) in headers.pairs() {
                    if literal {
                        dst.extend_from_slice(k.as_bytes());
                        dst.put_u8(b':');
                        dst.extend_from_slice(v.as_bytes());
                    } else {
                        dst.extend_from_slice(escape::encode(k).as_bytes());
                        dst.put_u8(b':');
                        dst.extend_from_slice(escape::encode(v).as_bytes());
                    }
                    dst.put_u8(b'\n');
                }
                dst.put_u8(b'\n');
                dst.extend_from_slice(&frame.body);
                dst.put_u8(0);
            }
        }
        self.count_written(dst.len() - start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(codec: &mut StompCodec, frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        codec.encode(StompItem::Frame(frame), &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn connect_is_literal_and_has_no_content_length() {
        let mut codec = StompCodec::with_protocol(Protocol::V1_2);
        let bytes = encode(
            &mut codec,
            Frame::new("CONNECT").header("login", "us:er"),
        );
        assert_eq!(bytes, b"CONNECT\nlogin:us:er\n\n\0");
    }

    #[test]
    fn escapes_only_from_1_1() {
        let frame = Frame::new("SEND")
            .header("destination", "/q")
            .header("k:1", "a\nb")
            .header(headers::SUPPRESS_CONTENT_LENGTH, "");
        let mut v10 = StompCodec::with_protocol(Protocol::V1_0);
        let mut v11 = StompCodec::with_protocol(Protocol::V1_1);
        assert_eq!(
            encode(&mut v10, frame.clone()),
            b"SEND\ndestination:/q\nk:1:a\nb\n\n\0"
        );
        assert_eq!(
            encode(&mut v11, frame),
            b"SEND\ndestination:/q\nk\\c1:a\\nb\n\n\0"
        );
    }

    #[test]
    fn supplied_content_length_is_kept() {
        let mut codec = StompCodec::new();
        let bytes = encode(
            &mut codec,
            Frame::new("SEND")
                .header("content-length", "2")
                .set_body(b"hi".to_vec()),
        );
        assert_eq!(bytes, b"SEND\ncontent-length:2\n\nhi\0");
    }

    #[test]
    fn stats_count_bytes_both_ways() {
        let stats = Arc::new(WireStats::default());
        let mut codec = StompCodec::new().with_stats(stats.clone());
        let bytes = encode(&mut codec, Frame::new("BEGIN").header("transaction", "t"));
        let mut buf = BytesMut::from(&bytes[..]);
        codec.decode(&mut buf).unwrap().unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_written, bytes.len() as u64);
        assert_eq!(snap.bytes_read, bytes.len() as u64);
    }

    #[test]
    fn leading_nul_trim_is_opt_in() {
        let raw = b"\0RECEIPT\nreceipt-id:1\n\n\0";
        let mut plain = StompCodec::new();
        assert!(plain.decode(&mut BytesMut::from(&raw[..])).is_err());

        let mut trimming = StompCodec::new().trim_leading_nul(true);
        match trimming.decode(&mut BytesMut::from(&raw[..])).unwrap() {
            Some(StompItem::Frame(f)) => assert_eq!(f.command, "RECEIPT"),
            other => panic!("expected frame, got {:?}", other),
        }
    }
}
