use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::codec::{ConnStats, StompCodec, StompItem, WireStats};
use crate::config::ConnectOptions;
use crate::error::{ConnError, ServerError};
use crate::frame::{self, Frame, MessageData};
use crate::headers::{self, Headers};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStats, parse_heartbeat_header};
use crate::protocol::{Protocol, check_client_versions, negotiate_protocol};
use crate::reader;
use crate::subscription::{
    AckMode, Subscription, SubscriptionEntry, SubscriptionRegistry, destination_id, random_id,
};
use crate::writer::{self, WriteRequest};

const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";

/// State shared by the connection handles and its background tasks.
pub(crate) struct Shared {
    pub(crate) options: ConnectOptions,
    pub(crate) protocol: OnceLock<Protocol>,
    pub(crate) heartbeat: OnceLock<Arc<HeartbeatMonitor>>,
    pub(crate) connected: AtomicBool,
    pub(crate) stats: Arc<WireStats>,
    pub(crate) registry: SubscriptionRegistry,
    /// Parked by `disconnect`; takes the next ERROR or RECEIPT frame.
    receipt_waiter: Mutex<Option<oneshot::Sender<Frame>>>,
    shutdown: broadcast::Sender<()>,
}

impl Shared {
    fn new(options: ConnectOptions, stats: Arc<WireStats>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            options,
            protocol: OnceLock::new(),
            heartbeat: OnceLock::new(),
            connected: AtomicBool::new(false),
            stats,
            registry: SubscriptionRegistry::default(),
            receipt_waiter: Mutex::new(None),
            shutdown,
        }
    }

    pub(crate) async fn take_receipt_waiter(&self) -> Option<oneshot::Sender<Frame>> {
        self.receipt_waiter.lock().await.take()
    }

    fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Clear the connected flag, stop heart-beats and signal the reader and
    /// writer to exit. Returns whether the connection was up.
    pub(crate) fn shut_down(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if let Some(hb) = self.heartbeat.get() {
            hb.stop();
        }
        let _ = self.shutdown.send(());
        was_connected
    }
}

/// A STOMP session over a single transport.
///
/// `Connection` is a cheap handle: clones share the same writer, reader
/// and subscription registry. Every command validates its headers locally,
/// hands the frame to the writer task and waits for that write to finish,
/// so a write error is reported to the caller that issued it.
///
/// MESSAGE frames arrive on the [`Subscription`] returned by
/// [`subscribe`](Connection::subscribe). ERROR and RECEIPT frames, and the
/// error that ends the reader, arrive on the connection-level channel read
/// by [`next_message`](Connection::next_message).
#[derive(Clone)]
pub struct Connection {
    outbound_tx: mpsc::Sender<WriteRequest>,
    /// Shared so cloned handles may call `next_message` concurrently.
    inbound_rx: Arc<Mutex<mpsc::Receiver<MessageData>>>,
    shared: Arc<Shared>,
    connected_frame: Arc<Frame>,
}

impl Connection {
    /// Open a session over `transport` with default options.
    ///
    /// `headers` become the CONNECT (or STOMP) frame headers, typically
    /// `accept-version`, `host`, `login`, `passcode` and `heart-beat`.
    pub async fn connect<T>(transport: T, headers: Headers) -> Result<Self, ConnError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::connect_with_options(transport, headers, ConnectOptions::default()).await
    }

    /// Dial `addr` over TCP and open a session with default options.
    pub async fn connect_tcp(addr: &str, headers: Headers) -> Result<Self, ConnError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect(stream, headers).await
    }

    /// Open a session over `transport`.
    ///
    /// The headers are checked before anything is written: they must be
    /// well formed, carry no `receipt`, and when `accept-version` is present
    /// it must list a supported version and be accompanied by `host`.
    ///
    /// The writer task is started first and the CONNECT frame written
    /// through it; if that write fails the reader is never started. The
    /// reply is read inline. ERROR fails the call with the broker's error,
    /// anything but CONNECTED is a protocol error. Once the protocol level is
    /// negotiated and heart-beats (1.1+) are running the connection is
    /// marked connected and the reader task starts.
    pub async fn connect_with_options<T>(
        transport: T,
        headers: Headers,
        options: ConnectOptions,
    ) -> Result<Self, ConnError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        check_connect_headers(&headers)?;

        let stats = Arc::new(WireStats::default());
        let codec = StompCodec::new()
            .trim_leading_nul(options.trim_leading_nul)
            .with_stats(stats.clone());
        let (rd, wr) = tokio::io::split(transport);
        let mut stream = FramedRead::new(rd, codec.clone());
        let sink = FramedWrite::new(wr, codec);

        let (out_tx, out_rx) = mpsc::channel(options.outbound_capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(options.connection_capacity.max(1));
        let shared = Arc::new(Shared::new(options, stats));

        tokio::spawn(writer::run(
            sink,
            out_rx,
            shared.clone(),
            shared.subscribe_shutdown(),
        ));

        let connected = match handshake(&headers, &mut stream, &shared, &out_tx).await {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "handshake failed");
                shared.shut_down();
                return Err(e);
            }
        };

        info!(
            protocol = %shared.protocol.get().copied().unwrap_or_default(),
            session = connected.get_header(headers::SESSION).unwrap_or(""),
            server = connected.get_header(headers::SERVER).unwrap_or(""),
            "connected"
        );
        shared.connected.store(true, Ordering::Release);
        tokio::spawn(reader::run(
            stream,
            shared.clone(),
            in_tx,
            shared.subscribe_shutdown(),
        ));

        Ok(Connection {
            outbound_tx: out_tx,
            inbound_rx: Arc::new(Mutex::new(in_rx)),
            shared,
            connected_frame: Arc::new(connected),
        })
    }

    /// Negotiated protocol level.
    pub fn protocol(&self) -> Protocol {
        self.shared.protocol.get().copied().unwrap_or_default()
    }

    /// Broker session id from CONNECTED, if any.
    pub fn session(&self) -> Option<&str> {
        self.connected_frame.get_header(headers::SESSION)
    }

    /// Broker `server` header from CONNECTED, if any.
    pub fn server(&self) -> Option<&str> {
        self.connected_frame.get_header(headers::SERVER)
    }

    pub fn connected_frame(&self) -> &Frame {
        &self.connected_frame
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Frame and byte counters for both directions.
    pub fn stats(&self) -> ConnStats {
        self.shared.stats.snapshot()
    }

    /// Heart-beat state, or `None` when heart-beats are off.
    pub fn heartbeat_stats(&self) -> Option<HeartbeatStats> {
        self.shared.heartbeat.get().map(|hb| hb.stats())
    }

    pub async fn subscription_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Next item on the connection-level channel: ERROR or RECEIPT frames
    /// and, last, the error that stopped the reader. `None` once the reader
    /// has exited and everything was consumed.
    pub async fn next_message(&self) -> Option<MessageData> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// SEND a UTF-8 body. Adds `content-type:text/plain; charset=UTF-8`
    /// unless a content type is given or `suppress-content-type` is set.
    pub async fn send(&self, headers: Headers, body: &str) -> Result<(), ConnError> {
        self.prepare(&headers)?;
        require(&headers, headers::DESTINATION)?;
        let mut headers = headers;
        if !headers.contains(headers::CONTENT_TYPE) && !headers.contains(headers::SUPPRESS_CONTENT_TYPE)
        {
            headers.push(headers::CONTENT_TYPE, TEXT_PLAIN);
        }
        self.transmit(frame::SEND, headers, body.as_bytes().to_vec())
            .await
    }

    /// SEND a binary body. No content type is added.
    pub async fn send_bytes(&self, headers: Headers, body: &[u8]) -> Result<(), ConnError> {
        self.prepare(&headers)?;
        require(&headers, headers::DESTINATION)?;
        self.transmit(frame::SEND, headers, body.to_vec()).await
    }

    /// Subscribe to the `destination` header's destination.
    ///
    /// `ack` defaults to `auto` and must be valid for the negotiated
    /// protocol. Without an `id` header one is generated: on 1.0 it is
    /// derived from the destination, so a second id-less subscription to
    /// the same destination is a duplicate; on 1.1+ it is random.
    ///
    /// The registry entry exists before SUBSCRIBE is written, so no MESSAGE
    /// can outrun it; it is removed again if the write fails.
    pub async fn subscribe(&self, headers: Headers) -> Result<Subscription, ConnError> {
        let protocol = self.prepare(&headers)?;
        let destination = require(&headers, headers::DESTINATION)?.to_string();
        let ack = match headers.value(headers::ACK) {
            Some(mode) => AckMode::parse(mode, protocol)?,
            None => AckMode::default(),
        };

        let mut headers = headers;
        let id = match headers.value(headers::ID) {
            Some(id) => id.to_string(),
            None => {
                let id = if protocol == Protocol::V1_0 {
                    destination_id(&destination)
                } else {
                    random_id()
                };
                headers.push(headers::ID, &id);
                id
            }
        };

        let entry = SubscriptionEntry::new(
            id.clone(),
            destination,
            ack,
            self.shared.options.subscription_capacity,
        );
        self.shared.registry.insert(entry.clone()).await?;

        if let Err(e) = self.transmit(frame::SUBSCRIBE, headers, Vec::new()).await {
            self.shared.registry.remove(&id).await;
            return Err(e);
        }
        debug!(subscription = %id, destination = %entry.destination, ack = ack.as_str(), "subscribed");
        Ok(Subscription::new(&entry, self.clone()))
    }

    /// Unsubscribe by `id`, or on 1.0 by `destination`.
    ///
    /// With `drain-now` (value: optional window in milliseconds) MESSAGE
    /// frames still arriving for the subscription are dropped, and whatever
    /// is already queued is discarded for the drain window before the
    /// registry entry goes away.
    pub async fn unsubscribe(&self, headers: Headers) -> Result<(), ConnError> {
        let protocol = self.prepare(&headers)?;
        let id = match headers.value(headers::ID) {
            Some(id) => id.to_string(),
            None if protocol == Protocol::V1_0 => {
                destination_id(require(&headers, headers::DESTINATION)?)
            }
            None => return Err(ConnError::MissingHeader(headers::ID)),
        };
        let entry = self
            .shared
            .registry
            .get_open(&id)
            .await
            .ok_or_else(|| ConnError::UnknownSubscription(id.clone()))?;

        let drain = headers.value(headers::DRAIN_NOW).map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .unwrap_or(self.shared.options.drain_window)
        });
        if drain.is_some() {
            entry.arm_drain();
        }

        if let Err(e) = self.transmit(frame::UNSUBSCRIBE, headers, Vec::new()).await {
            entry.disarm_drain();
            return Err(e);
        }

        if let Some(window) = drain {
            let dropped = entry.drain_for(window).await;
            debug!(subscription = %id, dropped, ?window, "drained subscription");
        }
        entry.close();
        self.shared.registry.remove(&id).await;
        debug!(subscription = %id, "unsubscribed");
        Ok(())
    }

    /// ACK a message.
    ///
    /// 1.0 needs `message-id`; 1.1 and 1.2 need `message-id` and
    /// `subscription`. An `id` header is passed through untouched.
    pub async fn ack(&self, headers: Headers) -> Result<(), ConnError> {
        let protocol = self.prepare(&headers)?;
        check_ack_headers(protocol, &headers)?;
        self.transmit(frame::ACK, headers, Vec::new()).await
    }

    /// NACK a message. Not part of STOMP 1.0.
    pub async fn nack(&self, headers: Headers) -> Result<(), ConnError> {
        let protocol = self.prepare(&headers)?;
        if protocol == Protocol::V1_0 {
            return Err(ConnError::NackNotSupported);
        }
        check_ack_headers(protocol, &headers)?;
        self.transmit(frame::NACK, headers, Vec::new()).await
    }

    /// BEGIN a transaction named by the `transaction` header.
    pub async fn begin(&self, headers: Headers) -> Result<(), ConnError> {
        self.transaction_frame(frame::BEGIN, headers).await
    }

    /// COMMIT the transaction named by the `transaction` header.
    pub async fn commit(&self, headers: Headers) -> Result<(), ConnError> {
        self.transaction_frame(frame::COMMIT, headers).await
    }

    /// ABORT the transaction named by the `transaction` header.
    pub async fn abort(&self, headers: Headers) -> Result<(), ConnError> {
        self.transaction_frame(frame::ABORT, headers).await
    }

    /// End the session.
    ///
    /// Unless `no-receipt` is given a receipt is requested (a random id is
    /// used when the caller supplies none) and the next connection-level
    /// frame must be the matching RECEIPT. That frame is handed straight to
    /// this call, never to `next_message`. The wait is bounded by
    /// `ConnectOptions::disconnect_receipt_wait` when set.
    ///
    /// The connection is shut down whatever the outcome; the returned
    /// error only reports how the goodbye went.
    pub async fn disconnect(&self, headers: Headers) -> Result<(), ConnError> {
        self.prepare(&headers)?;
        let mut headers = headers;
        let receipt = if headers.contains(headers::NO_RECEIPT) {
            None
        } else {
            match headers.value(headers::RECEIPT) {
                Some(r) => Some(r.to_string()),
                None => {
                    let r = random_id();
                    headers.push(headers::RECEIPT, &r);
                    Some(r)
                }
            }
        };

        let waiter = match receipt {
            Some(expected) => {
                let (tx, rx) = oneshot::channel();
                *self.shared.receipt_waiter.lock().await = Some(tx);
                // the reader shuts down before dropping the waiter
                if !self.is_connected() {
                    self.shared.take_receipt_waiter().await;
                    return Err(ConnError::NotConnected);
                }
                Some((expected, rx))
            }
            None => None,
        };

        let outcome = match self.transmit(frame::DISCONNECT, headers, Vec::new()).await {
            Ok(()) => match waiter {
                Some((expected, rx)) => self.await_receipt(&expected, rx).await,
                None => Ok(()),
            },
            Err(e) => Err(e),
        };

        self.shared.take_receipt_waiter().await;
        self.shared.shut_down();
        match &outcome {
            Ok(()) => info!("disconnected"),
            Err(e) => info!(error = %e, "disconnected without clean receipt"),
        }
        outcome
    }

    async fn await_receipt(
        &self,
        expected: &str,
        reply: oneshot::Receiver<Frame>,
    ) -> Result<(), ConnError> {
        let reply = match self.shared.options.disconnect_receipt_wait {
            Some(limit) => timeout(limit, reply)
                .await
                .map_err(|_| ConnError::ReceiptTimeout(expected.to_string()))?,
            None => reply.await,
        };
        let Ok(reply) = reply else {
            return Err(ConnError::Protocol(
                "connection closed before RECEIPT".to_string(),
            ));
        };
        if reply.command == frame::ERROR {
            return Err(ConnError::ServerRejected(ServerError::from_frame(reply)));
        }
        if reply.command != frame::RECEIPT {
            return Err(ConnError::Protocol(format!(
                "expected RECEIPT, got {}",
                reply.command
            )));
        }
        match reply.get_header(headers::RECEIPT_ID) {
            Some(id) if id == expected => Ok(()),
            other => Err(ConnError::ReceiptMismatch {
                expected: expected.to_string(),
                received: other.unwrap_or_default().to_string(),
            }),
        }
    }

    async fn transaction_frame(&self, command: &str, headers: Headers) -> Result<(), ConnError> {
        self.prepare(&headers)?;
        require(&headers, headers::TRANSACTION)?;
        self.transmit(command, headers, Vec::new()).await
    }

    fn ensure_connected(&self) -> Result<(), ConnError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnError::NotConnected)
        }
    }

    /// Connected check plus header validation for the current protocol.
    fn prepare(&self, headers: &Headers) -> Result<Protocol, ConnError> {
        self.ensure_connected()?;
        let protocol = self.protocol();
        headers.validate_for(protocol)?;
        Ok(protocol)
    }

    async fn transmit(
        &self,
        command: &str,
        headers: Headers,
        body: Vec<u8>,
    ) -> Result<(), ConnError> {
        let frame = Frame::new(command).with_headers(headers).set_body(body);
        writer::write_and_wait(&self.outbound_tx, frame).await
    }
}

fn require<'a>(headers: &'a Headers, key: &'static str) -> Result<&'a str, ConnError> {
    headers.value(key).ok_or(ConnError::MissingHeader(key))
}

fn check_connect_headers(headers: &Headers) -> Result<(), ConnError> {
    headers.validate()?;
    if headers.contains(headers::RECEIPT) {
        return Err(ConnError::ReceiptOnConnect);
    }
    if let Some(versions) = headers.value(headers::ACCEPT_VERSION) {
        check_client_versions(versions)?;
        require(headers, headers::HOST)?;
    }
    if let Some(hb) = headers.value(headers::HEART_BEAT) {
        parse_heartbeat_header(hb)?;
    }
    Ok(())
}

fn check_ack_headers(protocol: Protocol, headers: &Headers) -> Result<(), ConnError> {
    match protocol {
        Protocol::V1_0 => {
            require(headers, headers::MESSAGE_ID)?;
        }
        Protocol::V1_1 | Protocol::V1_2 => {
            require(headers, headers::MESSAGE_ID)?;
            require(headers, headers::SUBSCRIPTION)?;
        }
    }
    Ok(())
}

/// Write CONNECT/STOMP, read the reply and negotiate protocol and
/// heart-beats. Returns the CONNECTED frame.
async fn handshake<R>(
    headers: &Headers,
    stream: &mut FramedRead<R, StompCodec>,
    shared: &Shared,
    outbound: &mpsc::Sender<WriteRequest>,
) -> Result<Frame, ConnError>
where
    R: AsyncRead + Unpin,
{
    let accept_version = headers.value(headers::ACCEPT_VERSION);
    let verb = if accept_version.is_some() && shared.options.stomp_verb {
        frame::STOMP
    } else {
        frame::CONNECT
    };
    debug!(verb, "sending connect frame");
    writer::write_and_wait(outbound, Frame::new(verb).with_headers(headers.clone())).await?;

    let reply = loop {
        match reader::read_next(stream, &shared.options.deadlines).await {
            Some(Ok(StompItem::Heartbeat)) => continue,
            Some(Ok(StompItem::Frame(f))) => break f,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ConnError::Protocol(
                    "connection closed before CONNECTED".to_string(),
                ));
            }
        }
    };
    shared.stats.frames_read.fetch_add(1, Ordering::Relaxed);

    if reply.command == frame::ERROR {
        return Err(ConnError::ServerRejected(ServerError::from_frame(reply)));
    }
    if reply.command != frame::CONNECTED {
        return Err(ConnError::Protocol(format!(
            "expected CONNECTED, got {}",
            reply.command
        )));
    }

    let protocol = negotiate_protocol(accept_version, reply.get_header(headers::VERSION))?;
    stream.decoder_mut().set_protocol(protocol);
    let _ = shared.protocol.set(protocol);
    debug!(%protocol, "protocol negotiated");

    if protocol >= Protocol::V1_1 {
        let monitor = HeartbeatMonitor::negotiate(
            headers.value(headers::HEART_BEAT),
            reply.get_header(headers::HEART_BEAT),
        )?;
        if let Some(hb) = monitor {
            info!(
                send = ?hb.send_interval(),
                receive = ?hb.receive_interval(),
                "heart-beats negotiated"
            );
            let _ = shared.heartbeat.set(hb.clone());
            hb.start(outbound.clone());
        }
    }
    Ok(reply)
}
