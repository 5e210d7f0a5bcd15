use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::connection::Connection;
use crate::error::ConnError;
use crate::frame::{Message, MessageData};
use crate::headers::{self, Headers};
use crate::protocol::Protocol;

/// Subscription acknowledgement modes.
///
/// `client-individual` only exists from STOMP 1.1 on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    /// Modes a broker speaking `protocol` understands.
    pub fn allowed(protocol: Protocol) -> &'static [AckMode] {
        match protocol {
            Protocol::V1_0 => &[AckMode::Auto, AckMode::Client],
            _ => &[AckMode::Auto, AckMode::Client, AckMode::ClientIndividual],
        }
    }

    /// Parse an `ack` header value for `protocol`.
    pub fn parse(value: &str, protocol: Protocol) -> Result<Self, ConnError> {
        Self::allowed(protocol)
            .iter()
            .copied()
            .find(|m| m.as_str() == value)
            .ok_or_else(|| ConnError::InvalidAckMode {
                mode: value.to_string(),
                protocol,
            })
    }
}

/// Deterministic id for a 1.0 subscription without an explicit `id`.
pub fn destination_id(destination: &str) -> String {
    hex::encode(Sha256::digest(destination.as_bytes()))
}

/// Fresh random id for a 1.1+ subscription without an explicit `id`.
pub fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<MessageData>>>;

/// Registry entry for one open subscription.
#[derive(Debug)]
pub(crate) struct SubscriptionEntry {
    pub(crate) id: String,
    pub(crate) destination: String,
    pub(crate) ack: AckMode,
    sender: mpsc::Sender<MessageData>,
    receiver: SharedReceiver,
    closed: AtomicBool,
    draining: AtomicBool,
    drain_seen: AtomicU64,
}

impl SubscriptionEntry {
    pub(crate) fn new(
        id: String,
        destination: String,
        ack: AckMode,
        capacity: usize,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Arc::new(Self {
            id,
            destination,
            ack,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            closed: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            drain_seen: AtomicU64::new(0),
        })
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<MessageData> {
        &self.sender
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn arm_drain(&self) {
        self.drain_seen.store(0, Ordering::Relaxed);
        self.draining.store(true, Ordering::Release);
    }

    pub(crate) fn disarm_drain(&self) {
        self.draining.store(false, Ordering::Release);
    }

    /// Count a MESSAGE arriving while draining. Returns true when it
    /// should be dropped.
    pub(crate) fn drain_should_drop(&self, threshold: u64) -> bool {
        if !self.draining.load(Ordering::Acquire) {
            return false;
        }
        let seen = self.drain_seen.fetch_add(1, Ordering::Relaxed) + 1;
        seen > threshold
    }

    /// Discard whatever is queued or arrives within `window`. Returns the
    /// number of messages discarded.
    pub(crate) async fn drain_for(&self, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        let mut dropped = 0;
        let _ = timeout_at(deadline, async {
            let mut rx = self.receiver.lock().await;
            while rx.recv().await.is_some() {
                dropped += 1;
            }
        })
        .await;
        dropped
    }
}

/// All open subscriptions of one connection, keyed by subscription id.
///
/// Looked up under the read lock for every inbound MESSAGE; the write lock
/// is only taken by subscribe, unsubscribe and teardown.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, Arc<SubscriptionEntry>>>,
}

impl SubscriptionRegistry {
    pub(crate) async fn insert(&self, entry: Arc<SubscriptionEntry>) -> Result<(), ConnError> {
        let mut map = self.entries.write().await;
        if map.contains_key(&entry.id) {
            return Err(ConnError::DuplicateSubscription(entry.id.clone()));
        }
        map.insert(entry.id.clone(), entry);
        Ok(())
    }

    pub(crate) async fn get(&self, id: &str) -> Option<Arc<SubscriptionEntry>> {
        self.entries.read().await.get(id).cloned()
    }

    /// The entry for `id` if it exists and is still open.
    pub(crate) async fn get_open(&self, id: &str) -> Option<Arc<SubscriptionEntry>> {
        self.get(id).await.filter(|e| !e.is_closed())
    }

    pub(crate) async fn remove(&self, id: &str) -> Option<Arc<SubscriptionEntry>> {
        self.entries.write().await.remove(id)
    }

    /// Drop every entry, ending all subscription streams.
    pub(crate) async fn clear(&self) {
        let mut map = self.entries.write().await;
        if !map.is_empty() {
            debug!(count = map.len(), "clearing subscriptions");
        }
        map.clear();
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Handle returned by [`Connection::subscribe`].
///
/// Yields the MESSAGE frames routed to this subscription id. The stream
/// ends after unsubscribe or when the connection goes away.
pub struct Subscription {
    id: String,
    destination: String,
    ack: AckMode,
    stream: BoxStream<'static, MessageData>,
    conn: Connection,
}

impl Subscription {
    pub(crate) fn new(entry: &SubscriptionEntry, conn: Connection) -> Self {
        let receiver = entry.receiver.clone();
        let stream = stream::unfold(receiver, |rx| async move {
            let item = rx.lock().await.recv().await;
            item.map(|md| (md, rx))
        })
        .boxed();
        Self {
            id: entry.id.clone(),
            destination: entry.destination.clone(),
            ack: entry.ack,
            stream,
            conn,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack
    }

    /// Next message, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<MessageData> {
        self.stream.next().await
    }

    /// ACK `message` with the headers its protocol level expects.
    pub async fn ack(&self, message: &Message) -> Result<(), ConnError> {
        let headers = ack_headers(self.conn.protocol(), message, &self.id);
        self.conn.ack(headers).await
    }

    /// NACK `message`. Not available on 1.0.
    pub async fn nack(&self, message: &Message) -> Result<(), ConnError> {
        let headers = ack_headers(self.conn.protocol(), message, &self.id);
        self.conn.nack(headers).await
    }

    /// Unsubscribe this subscription by id.
    pub async fn unsubscribe(self) -> Result<(), ConnError> {
        self.conn
            .unsubscribe(Headers::new().add(headers::ID, &self.id))
            .await
    }
}

impl Stream for Subscription {
    type Item = MessageData;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

/// ACK/NACK headers for a received MESSAGE.
///
/// `message-id` always, `subscription` from 1.1 on. On 1.2 the message's
/// `ack` header, when the broker sent one, is added as `id`.
pub fn ack_headers(protocol: Protocol, message: &Message, subscription_id: &str) -> Headers {
    let mut h = Headers::new();
    if let Some(message_id) = message.get_header(headers::MESSAGE_ID) {
        h.push(headers::MESSAGE_ID, message_id);
    }
    if protocol >= Protocol::V1_1 {
        let sub = message
            .get_header(headers::SUBSCRIPTION)
            .unwrap_or(subscription_id);
        h.push(headers::SUBSCRIPTION, sub);
    }
    if protocol == Protocol::V1_2 {
        if let Some(ack_id) = message.get_header(headers::ACK) {
            h.push(headers::ID, ack_id);
        }
    }
    h
}
