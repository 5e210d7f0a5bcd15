//! Heart-beat negotiation and the two liveness tasks.
//!
//! The client sends `heart-beat:cx,cy` on CONNECT and the broker answers
//! with `heart-beat:sx,sy` (milliseconds). The client sends every
//! `max(cx, sy)` when both are nonzero and expects to hear from the broker
//! every `max(cy, sx)` when both are nonzero.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, trace, warn};

use crate::error::ConnError;
use crate::writer::WriteRequest;

/// A `heart-beat` header value: `send_ms,receive_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often this side offers to send, in milliseconds (0 = never).
    pub send_ms: u64,
    /// How often this side wants to receive, in milliseconds (0 = never).
    pub receive_ms: u64,
}

impl Heartbeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    /// `0,0`: no heart-beats in either direction.
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Same interval in both directions.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self::new(ms, ms)
    }

    pub fn is_disabled(&self) -> bool {
        self.send_ms == 0 && self.receive_ms == 0
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

impl FromStr for Heartbeat {
    type Err = ConnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cx, cy) = parse_heartbeat_header(s)?;
        Ok(Self::new(cx, cy))
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Both fields must be present and be non-negative integers; surrounding
/// whitespace is ignored. Anything else is a `ConnError::Heartbeat`.
pub fn parse_heartbeat_header(header: &str) -> Result<(u64, u64), ConnError> {
    let parts: Vec<&str> = header.split(',').collect();
    if parts.len() != 2 {
        return Err(ConnError::Heartbeat(format!(
            "'{}': expected two comma separated values",
            header
        )));
    }
    let field = |s: &str| {
        s.trim()
            .parse::<u64>()
            .map_err(|e| ConnError::Heartbeat(format!("'{}': {}", header, e)))
    };
    Ok((field(parts[0])?, field(parts[1])?))
}

/// Negotiate heartbeat intervals between client and server.
///
/// Returns `(outgoing, incoming)`; a direction is `None` unless both
/// sides asked for it, in which case it is the larger of the two values.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let pick = |a: u64, b: u64| {
        if a == 0 || b == 0 {
            None
        } else {
            Some(Duration::from_millis(a.max(b)))
        }
    };
    (pick(client_out, server_in), pick(client_in, server_out))
}

/// Snapshot of heart-beat state for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Negotiated send interval (zero when not sending).
    pub send_interval: Duration,
    /// Negotiated receive interval (zero when not checking).
    pub receive_interval: Duration,
    /// Heart-beat LFs written.
    pub sent: u64,
    /// Heart-beat LFs read.
    pub received: u64,
    /// Receive checks that found the broker silent for too long.
    pub missed: u64,
    /// The broker is currently overdue.
    pub stale: bool,
}

/// Running heart-beat state shared by the writer, the reader and the two
/// ticker tasks.
///
/// Last-send and last-receive timestamps each sit behind their own lock so
/// the hot I/O paths never contend with each other.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    send_interval: Duration,
    receive_interval: Duration,
    last_send: Mutex<Instant>,
    last_receive: Mutex<Instant>,
    sent: AtomicU64,
    received: AtomicU64,
    missed: AtomicU64,
    stale: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

fn lock(m: &Mutex<Instant>) -> MutexGuard<'_, Instant> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl HeartbeatMonitor {
    /// Negotiate from the client's and the broker's `heart-beat` values
    /// (absent means `0,0`). Returns `None` when both directions end up
    /// disabled.
    pub fn negotiate(
        client: Option<&str>,
        server: Option<&str>,
    ) -> Result<Option<Arc<Self>>, ConnError> {
        let (cx, cy) = parse_heartbeat_header(client.unwrap_or("0,0"))?;
        let (sx, sy) = parse_heartbeat_header(server.unwrap_or("0,0"))?;
        match negotiate_heartbeats(cx, cy, sx, sy) {
            (None, None) => Ok(None),
            (send, receive) => Ok(Some(Arc::new(Self::new(
                send.unwrap_or_default(),
                receive.unwrap_or_default(),
            )))),
        }
    }

    fn new(send_interval: Duration, receive_interval: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let now = Instant::now();
        Self {
            send_interval,
            receive_interval,
            last_send: Mutex::new(now),
            last_receive: Mutex::new(now),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            missed: AtomicU64::new(0),
            stale: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    pub fn receive_interval(&self) -> Duration {
        self.receive_interval
    }

    /// Called by the writer after every successful write.
    pub fn record_send(&self, heartbeat: bool) {
        *lock(&self.last_send) = Instant::now();
        if heartbeat {
            self.sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Called by the reader for every frame or heart-beat read.
    pub fn record_receive(&self, heartbeat: bool) {
        *lock(&self.last_receive) = Instant::now();
        if heartbeat {
            self.received.fetch_add(1, Ordering::Relaxed);
        }
        if self.stale.swap(false, Ordering::Relaxed) {
            debug!("broker heart-beat recovered");
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            send_interval: self.send_interval,
            receive_interval: self.receive_interval,
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            stale: self.is_stale(),
        }
    }

    /// Spawn the sender and receive-checker tasks for the directions that
    /// were negotiated. Heart-beats go out on `outbound` like any frame.
    pub fn start(self: &Arc<Self>, outbound: mpsc::Sender<WriteRequest>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if !self.send_interval.is_zero() {
            let monitor = self.clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(monitor.send_loop(outbound, shutdown)));
        }
        if !self.receive_interval.is_zero() {
            let monitor = self.clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(monitor.receive_loop(shutdown)));
        }
        tasks
    }

    /// Signal both tasks to exit.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    async fn send_loop(
        self: Arc<Self>,
        outbound: mpsc::Sender<WriteRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let period = self.send_interval / 2;
        let mut ticker = interval_at(Instant::now() + period, period);
        debug!(interval = ?self.send_interval, "heart-beat sender started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let idle = lock(&self.last_send).elapsed();
                    if idle < self.send_interval {
                        continue;
                    }
                    trace!(?idle, "sending heart-beat");
                    if outbound.send(WriteRequest::heartbeat()).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("heart-beat sender stopped");
    }

    async fn receive_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.receive_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        debug!(interval = ?period, "heart-beat receive checker started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let silent = lock(&self.last_receive).elapsed();
                    if silent <= period {
                        continue;
                    }
                    self.missed.fetch_add(1, Ordering::Relaxed);
                    if !self.stale.swap(true, Ordering::Relaxed) {
                        warn!(?silent, expected = ?period, "no data from broker within heart-beat interval");
                    }
                }
            }
        }
        debug!("heart-beat receive checker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_client_disables_monitor() {
        let m = HeartbeatMonitor::negotiate(Some("0,0"), Some("10000,10000")).unwrap();
        assert!(m.is_none());
        assert!(HeartbeatMonitor::negotiate(None, None).unwrap().is_none());
    }

    #[test]
    fn both_directions_negotiated() {
        let m = HeartbeatMonitor::negotiate(Some("250,250"), Some("500,100"))
            .unwrap()
            .expect("monitor");
        assert_eq!(m.send_interval(), Duration::from_millis(250));
        assert_eq!(m.receive_interval(), Duration::from_millis(500));
    }

    #[test]
    fn malformed_values_fail() {
        assert!(matches!(
            HeartbeatMonitor::negotiate(Some("abc"), None),
            Err(ConnError::Heartbeat(_))
        ));
        assert!(matches!(
            HeartbeatMonitor::negotiate(Some("1,1"), Some("1,2,3")),
            Err(ConnError::Heartbeat(_))
        ));
    }

    #[test]
    fn receive_clears_stale() {
        let m = HeartbeatMonitor::new(Duration::ZERO, Duration::from_millis(10));
        m.stale.store(true, Ordering::Relaxed);
        m.record_receive(true);
        let s = m.stats();
        assert!(!s.stale);
        assert_eq!(s.received, 1);
    }

    #[tokio::test]
    async fn sender_emits_heartbeat_when_idle() {
        let m = Arc::new(HeartbeatMonitor::new(
            Duration::from_millis(20),
            Duration::ZERO,
        ));
        let (tx, mut rx) = mpsc::channel(4);
        let tasks = m.start(tx);
        assert_eq!(tasks.len(), 1);

        let req = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("heart-beat in time")
            .expect("channel open");
        assert!(req.is_heartbeat());

        m.stop();
        for t in tasks {
            t.await.unwrap();
        }
    }

    #[tokio::test]
    async fn silent_broker_marks_stale() {
        let m = Arc::new(HeartbeatMonitor::new(
            Duration::ZERO,
            Duration::from_millis(10),
        ));
        let (tx, _rx) = mpsc::channel(1);
        let tasks = m.start(tx);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(m.is_stale());
        assert!(m.stats().missed >= 1);
        m.stop();
        for t in tasks {
            t.await.unwrap();
        }
    }
}
