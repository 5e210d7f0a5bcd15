//! Ordered STOMP header lists.
//!
//! A header list is a flat sequence of strings where the key sits at an
//! even index and its value at the following odd index. Duplicate keys are
//! legal and keep their order; lookups return the first match.

use std::fmt;

use crate::error::ConnError;
use crate::protocol::Protocol;

pub const ACCEPT_VERSION: &str = "accept-version";
pub const HOST: &str = "host";
pub const LOGIN: &str = "login";
pub const PASSCODE: &str = "passcode";
pub const HEART_BEAT: &str = "heart-beat";
pub const RECEIPT: &str = "receipt";
pub const RECEIPT_ID: &str = "receipt-id";
pub const SESSION: &str = "session";
pub const VERSION: &str = "version";
pub const SERVER: &str = "server";
pub const DESTINATION: &str = "destination";
pub const ID: &str = "id";
pub const ACK: &str = "ack";
pub const SUBSCRIPTION: &str = "subscription";
pub const MESSAGE_ID: &str = "message-id";
pub const TRANSACTION: &str = "transaction";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_TYPE: &str = "content-type";
pub const MESSAGE: &str = "message";

/// Client-local: do not insert `content-length` when encoding.
pub const SUPPRESS_CONTENT_LENGTH: &str = "suppress-content-length";
/// Client-local: do not insert `content-type` on SEND.
pub const SUPPRESS_CONTENT_TYPE: &str = "suppress-content-type";
/// Client-local: drain the subscription after UNSUBSCRIBE. An optional
/// numeric value is the drain window in milliseconds.
pub const DRAIN_NOW: &str = "drain-now";
/// Client-local: DISCONNECT without requesting a receipt.
pub const NO_RECEIPT: &str = "no-receipt";

/// Headers that never leave the client.
pub const CLIENT_LOCAL: [&str; 4] = [
    SUPPRESS_CONTENT_LENGTH,
    SUPPRESS_CONTENT_TYPE,
    DRAIN_NOW,
    NO_RECEIPT,
];

/// An ordered key/value header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<String>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a key/value pair (builder style).
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Append a key/value pair in place.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(key.into());
        self.0.push(value.into());
    }

    /// Value of the first header named `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.pairs().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// Drop every pair whose key is `key`.
    pub fn remove_all(&mut self, key: &str) {
        let mut kept = Vec::with_capacity(self.0.len());
        let mut it = std::mem::take(&mut self.0).into_iter();
        while let Some(k) = it.next() {
            let v = it.next();
            if k != key {
                kept.push(k);
                if let Some(v) = v {
                    kept.push(v);
                }
            }
        }
        self.0 = kept;
    }

    /// Iterate over complete key/value pairs. A dangling key (odd length)
    /// is not yielded.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .chunks_exact(2)
            .map(|kv| (kv[0].as_str(), kv[1].as_str()))
    }

    /// Number of strings in the list (twice the number of pairs when
    /// well-formed).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Structural checks that hold on every protocol level: even length
    /// and no empty keys.
    pub fn validate(&self) -> Result<(), ConnError> {
        if self.0.len() % 2 != 0 {
            return Err(ConnError::HeaderLength);
        }
        if self.pairs().any(|(k, _)| k.is_empty()) {
            return Err(ConnError::EmptyHeaderKey);
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the per-protocol value rules.
    ///
    /// Protocol 1.0 rejects empty values, except on the client-local
    /// extension headers. On 1.1 and 1.2 empty values are
    /// allowed; UTF-8 validity is guaranteed by `String` here and checked
    /// by the decoder for inbound frames.
    pub fn validate_for(&self, protocol: Protocol) -> Result<(), ConnError> {
        self.validate()?;
        if protocol == Protocol::V1_0 {
            let empty = self
                .pairs()
                .find(|(k, v)| v.is_empty() && !CLIENT_LOCAL.contains(k));
            if let Some((k, _)) = empty {
                return Err(ConnError::EmptyHeaderValue(k.to_string()));
            }
        }
        Ok(())
    }

    /// Copy of these headers without the client-local extension keys.
    pub fn without_client_local(&self) -> Headers {
        let mut out = self.clone();
        for key in CLIENT_LOCAL {
            out.remove_all(key);
        }
        out
    }
}

impl From<Vec<String>> for Headers {
    fn from(v: Vec<String>) -> Self {
        Self(v)
    }
}

impl From<Vec<&str>> for Headers {
    fn from(v: Vec<&str>) -> Self {
        Self(v.into_iter().map(str::to_string).collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut h = Headers::new();
        for (k, v) in iter {
            h.push(k, v);
        }
        h
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in self.pairs() {
            writeln!(f, "{}: {}", k, v)?;
        }
        Ok(())
    }
}
