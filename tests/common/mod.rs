//! In-memory broker for integration tests.
//!
//! The broker end of a `tokio::io::duplex` pipe, speaking through the same
//! `StompCodec` the client uses.

#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use osmium_stomp::{ConnectOptions, Connection, Frame, Headers, Protocol, StompCodec, StompItem};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockBroker {
    framed: Framed<DuplexStream, StompCodec>,
}

impl MockBroker {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, StompCodec::new()),
        }
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.framed.codec_mut().set_protocol(protocol);
    }

    /// Next item from the client, `None` on EOF.
    pub async fn recv_item(&mut self) -> Option<StompItem> {
        match timeout(WAIT, self.framed.next()).await {
            Ok(Some(Ok(item))) => Some(item),
            Ok(Some(Err(e))) => panic!("broker decode error: {}", e),
            Ok(None) => None,
            Err(_) => panic!("broker timed out waiting for client"),
        }
    }

    /// Next frame from the client, skipping heart-beats.
    pub async fn recv(&mut self) -> Frame {
        loop {
            match self.recv_item().await {
                Some(StompItem::Frame(f)) => return f,
                Some(StompItem::Heartbeat) => continue,
                None => panic!("client closed the connection"),
            }
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed
            .send(StompItem::Frame(frame))
            .await
            .expect("broker send");
    }

    /// Write bytes to the client bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let io = self.framed.get_mut();
        io.write_all(bytes).await.expect("broker write");
        io.flush().await.expect("broker flush");
    }
}

pub fn h(pairs: &[&str]) -> Headers {
    Headers::from(pairs.to_vec())
}

/// CONNECT headers for a 1.0-1.2 client with the given heart-beat value.
pub fn connect_headers(heart_beat: &str) -> Headers {
    h(&[
        "accept-version",
        "1.0,1.1,1.2",
        "host",
        "localhost",
        "login",
        "guest",
        "passcode",
        "guest",
        "heart-beat",
        heart_beat,
    ])
}

pub fn connected_frame(version: &str) -> Frame {
    Frame::new("CONNECTED")
        .header("version", version)
        .header("session", "session-1")
        .header("server", "mock/1.0")
}

/// Run the handshake: the broker answers CONNECT with `reply`.
pub async fn connect_with(
    headers: Headers,
    options: ConnectOptions,
    reply: Frame,
) -> (Result<Connection, osmium_stomp::ConnError>, MockBroker, Frame) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut broker = MockBroker::new(server);
    let connecting = tokio::spawn(Connection::connect_with_options(client, headers, options));

    let connect = broker.recv().await;
    broker.send(reply).await;
    let result = connecting.await.expect("connect task panicked");
    if let Ok(conn) = &result {
        broker.set_protocol(conn.protocol());
    }
    (result, broker, connect)
}

/// A 1.2 session without heart-beats.
pub async fn connected() -> (Connection, MockBroker) {
    connected_as("1.2", ConnectOptions::default()).await
}

pub async fn connected_as(version: &str, options: ConnectOptions) -> (Connection, MockBroker) {
    let (result, broker, _) =
        connect_with(connect_headers("0,0"), options, connected_frame(version)).await;
    (result.expect("connect"), broker)
}

/// A MESSAGE as a broker would route it to `subscription`.
pub fn message(subscription: &str, message_id: &str, body: &str) -> Frame {
    Frame::new("MESSAGE")
        .header("subscription", subscription)
        .header("message-id", message_id)
        .header("destination", "/queue/test")
        .set_body(body.as_bytes().to_vec())
}
