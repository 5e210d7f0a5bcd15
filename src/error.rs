use std::fmt;
use std::io;
use thiserror::Error;

use crate::frame::Frame;
use crate::protocol::Protocol;

/// Broad category of a [`ConnError`].
///
/// Everything except `Transport` leaves the connection usable: local
/// validation and state failures, broker replies, and deadline expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation attempted while not connected.
    ConnectionState,
    /// Malformed header list (odd length, empty key or value).
    HeaderFormat,
    /// Protocol version negotiation failed.
    Negotiation,
    /// A header required by the command/protocol combination is missing.
    CommandValidation,
    /// Duplicate or unknown subscription id.
    SubscriptionState,
    /// The broker answered with an ERROR frame or an unexpected receipt.
    Broker,
    /// A read, write or receipt wait ran past its limit.
    Deadline,
    /// Read or write failure on the wire.
    Transport,
}

/// Errors returned by `Connection` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    #[error("no current connection")]
    NotConnected,
    #[error("header list must contain key/value pairs (odd length)")]
    HeaderLength,
    #[error("header key must not be empty")]
    EmptyHeaderKey,
    #[error("header '{0}' has an empty value, not allowed on protocol 1.0")]
    EmptyHeaderValue(String),
    #[error("invalid utf8 in header: {0}")]
    HeaderUtf8(String),
    #[error("receipt header is not allowed on CONNECT")]
    ReceiptOnConnect,
    #[error("no supported protocol version in accept-version '{0}'")]
    UnsupportedClientVersion(String),
    /// The broker answered with a version the client never asked for.
    #[error("broker version '{server}' was not requested (accept-version '{client}')")]
    ClientVersionMismatch { client: String, server: String },
    /// The broker picked a requested version this engine cannot speak.
    #[error("broker version '{0}' is not supported")]
    ServerVersionMismatch(String),
    #[error("required header '{0}' is missing")]
    MissingHeader(&'static str),
    #[error("ack mode '{mode}' is not valid for protocol {protocol}")]
    InvalidAckMode { mode: String, protocol: Protocol },
    #[error("NACK is not available on protocol 1.0")]
    NackNotSupported,
    #[error("subscription id '{0}' already exists")]
    DuplicateSubscription(String),
    #[error("subscription id '{0}' is unknown or closed")]
    UnknownSubscription(String),
    #[error("{0}")]
    ServerRejected(ServerError),
    #[error("receipt mismatch: expected '{expected}', got '{received}'")]
    ReceiptMismatch { expected: String, received: String },
    /// Receipt timeout error
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("corrupt header line: {0}")]
    HeaderCorrupt(String),
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    #[error("malformed heart-beat header: {0}")]
    Heartbeat(String),
    #[error("read deadline expired")]
    ReadDeadline,
    #[error("write deadline expired")]
    WriteDeadline,
    #[error("writer task is not running")]
    WriterClosed,
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ConnError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        use ConnError::*;
        match self {
            NotConnected | WriterClosed => ErrorKind::ConnectionState,
            HeaderLength | EmptyHeaderKey | EmptyHeaderValue(_) => ErrorKind::HeaderFormat,
            UnsupportedClientVersion(_)
            | ClientVersionMismatch { .. }
            | ServerVersionMismatch(_)
            | Heartbeat(_) => ErrorKind::Negotiation,
            MissingHeader(_) | InvalidAckMode { .. } | NackNotSupported | ReceiptOnConnect => {
                ErrorKind::CommandValidation
            }
            DuplicateSubscription(_) | UnknownSubscription(_) => ErrorKind::SubscriptionState,
            ServerRejected(_) | ReceiptMismatch { .. } => ErrorKind::Broker,
            ReadDeadline | WriteDeadline | ReceiptTimeout(_) => ErrorKind::Deadline,
            HeaderUtf8(_)
            | UnknownCommand(_)
            | HeaderCorrupt(_)
            | InvalidContentLength(_)
            | Protocol(_)
            | Io(_) => ErrorKind::Transport,
        }
    }

    /// Whether this error tears the connection down. Deadline expiry does
    /// not: the reader keeps reading and the writer keeps writing.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// True for the clean end-of-stream the reader sees after DISCONNECT.
    pub fn is_eof(&self) -> bool {
        matches!(self, ConnError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// An ERROR frame sent by the broker, with its commonly used headers
/// pulled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Value of the `message` header, or "unknown error".
    pub message: String,
    /// Body decoded as UTF-8 (lossy), if non-empty.
    pub body: Option<String>,
    /// Value of the `receipt-id` header, if the error answers a receipt request.
    pub receipt_id: Option<String>,
    /// The original frame.
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&frame.body).into_owned())
        };
        let receipt_id = frame.get_header("receipt-id").map(str::to_string);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOMP server error: {}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
