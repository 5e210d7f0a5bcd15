use std::fmt;

use crate::error::ConnError;
use crate::headers::{self, Headers};

pub const CONNECT: &str = "CONNECT";
pub const STOMP: &str = "STOMP";
pub const DISCONNECT: &str = "DISCONNECT";
pub const SEND: &str = "SEND";
pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
pub const ACK: &str = "ACK";
pub const NACK: &str = "NACK";
pub const BEGIN: &str = "BEGIN";
pub const COMMIT: &str = "COMMIT";
pub const ABORT: &str = "ABORT";
pub const CONNECTED: &str = "CONNECTED";
pub const MESSAGE: &str = "MESSAGE";
pub const RECEIPT: &str = "RECEIPT";
pub const ERROR: &str = "ERROR";

/// Commands a client may send.
pub const CLIENT_COMMANDS: [&str; 11] = [
    CONNECT,
    STOMP,
    DISCONNECT,
    SEND,
    SUBSCRIBE,
    UNSUBSCRIBE,
    ACK,
    NACK,
    BEGIN,
    COMMIT,
    ABORT,
];

/// Commands a broker may send.
pub const SERVER_COMMANDS: [&str; 4] = [CONNECTED, MESSAGE, RECEIPT, ERROR];

/// Whether `command` is a legal client or server command token.
pub fn is_valid_command(command: &str) -> bool {
    CLIENT_COMMANDS.contains(&command) || SERVER_COMMANDS.contains(&command)
}

/// A simple representation of a STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered list
/// of headers and the raw body bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers
    pub headers: Headers,
    /// Raw body bytes
    pub body: Vec<u8>,
}

/// The frame type handed to applications.
pub type Message = Frame;

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(key, value);
        self
    }

    /// Replace all headers (builder style).
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Request a receipt for this frame (builder style).
    pub fn receipt(self, receipt_id: impl Into<String>) -> Self {
        self.header(headers::RECEIPT, receipt_id)
    }

    /// Get the value of a header by name.
    ///
    /// Returns the first header value matching the given key (case-sensitive),
    /// or `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.value(key)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        write!(f, "{}", self.headers)?;
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

/// One item on an inbound channel: a received message, or the error that
/// ended the reader.
#[derive(Debug)]
pub struct MessageData {
    pub message: Message,
    pub error: Option<ConnError>,
}

impl MessageData {
    pub fn from_frame(message: Message) -> Self {
        Self {
            message,
            error: None,
        }
    }

    pub fn from_error(error: ConnError) -> Self {
        Self {
            message: Message::default(),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
