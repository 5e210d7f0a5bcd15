//! Async STOMP 1.0/1.1/1.2 client connection engine.
//!
//! A [`Connection`] owns one transport (TCP, TLS, or anything
//! `AsyncRead + AsyncWrite`). A writer task serializes every outbound frame,
//! a reader task routes MESSAGE frames to per-subscription channels and
//! ERROR/RECEIPT frames to the connection-level channel, and when
//! heart-beats are negotiated two more tasks keep the link alive.
//!
//! ```no_run
//! use osmium_stomp::{BrokerEnv, Connection, Headers};
//!
//! # async fn run() -> Result<(), osmium_stomp::ConnError> {
//! let env = BrokerEnv::from_env();
//! let conn = Connection::connect_tcp(&env.address(), env.connect_headers()).await?;
//! let mut sub = conn
//!     .subscribe(Headers::new().add("destination", "/queue/demo"))
//!     .await?;
//! conn.send(Headers::new().add("destination", "/queue/demo"), "hello")
//!     .await?;
//! if let Some(md) = sub.recv().await {
//!     println!("{}", String::from_utf8_lossy(&md.message.body));
//! }
//! conn.disconnect(Headers::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod escape;
pub mod frame;
pub mod headers;
pub mod heartbeat;
pub mod parser;
pub mod protocol;
mod reader;
pub mod subscription;
mod writer;

pub use codec::{ConnStats, StompCodec, StompItem};
pub use config::{BrokerEnv, ConnectOptions, Deadlines, Direction};
pub use connection::Connection;
pub use error::{ConnError, ErrorKind, ServerError};
pub use frame::{Frame, Message, MessageData};
pub use headers::Headers;
pub use heartbeat::{Heartbeat, HeartbeatStats, negotiate_heartbeats, parse_heartbeat_header};
pub use protocol::Protocol;
pub use subscription::{AckMode, Subscription};
