//! Connection tuning and the environment-driven broker defaults.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConnError;
use crate::headers::{self, Headers};
use crate::protocol::Protocol;

/// Which side of the transport a deadline applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Called with the expired-deadline error and its direction.
pub type DeadlineCallback = Arc<dyn Fn(&ConnError, Direction) + Send + Sync>;

/// Independent read and write deadlines. `None` disables a direction.
#[derive(Clone, Default)]
pub struct Deadlines {
    pub read: Option<Duration>,
    pub write: Option<Duration>,
    on_expiry: Option<DeadlineCallback>,
}

impl Deadlines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, deadline: Duration) -> Self {
        self.read = Some(deadline);
        self
    }

    pub fn write(mut self, deadline: Duration) -> Self {
        self.write = Some(deadline);
        self
    }

    /// Register a callback invoked every time a deadline expires.
    pub fn on_expiry<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnError, Direction) + Send + Sync + 'static,
    {
        self.on_expiry = Some(Arc::new(f));
        self
    }

    pub(crate) fn notify(&self, err: &ConnError, direction: Direction) {
        if let Some(cb) = &self.on_expiry {
            cb(err, direction);
        }
    }
}

impl fmt::Debug for Deadlines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadlines")
            .field("read", &self.read)
            .field("write", &self.write)
            .field("on_expiry", &self.on_expiry.is_some())
            .finish()
    }
}

/// Options controlling how a connection is set up and run.
///
/// # Example
///
/// ```ignore
/// let options = ConnectOptions::default()
///     .subscription_capacity(256)
///     .deadlines(Deadlines::new().write(Duration::from_secs(5)))
///     .disconnect_receipt_wait(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Queue depth between callers and the writer task.
    pub outbound_capacity: usize,
    /// Depth of the connection-level channel (ERROR, RECEIPT, reader errors).
    pub connection_capacity: usize,
    /// Depth of each subscription channel. A full channel stalls the reader.
    pub subscription_capacity: usize,
    pub deadlines: Deadlines,
    /// Upper bound on the DISCONNECT receipt wait. `None` waits forever.
    pub disconnect_receipt_wait: Option<Duration>,
    /// Default time `drain-now` keeps discarding after UNSUBSCRIBE.
    pub drain_window: Duration,
    /// Messages a draining subscription may still receive before the
    /// reader starts dropping them.
    pub drain_threshold: u64,
    /// Send STOMP instead of CONNECT when `accept-version` is present.
    pub stomp_verb: bool,
    /// Discard NUL bytes that precede a command line.
    pub trim_leading_nul: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            outbound_capacity: 32,
            connection_capacity: 32,
            subscription_capacity: 64,
            deadlines: Deadlines::default(),
            disconnect_receipt_wait: None,
            drain_window: Duration::from_millis(250),
            drain_threshold: 0,
            stomp_verb: true,
            trim_leading_nul: false,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn connection_capacity(mut self, capacity: usize) -> Self {
        self.connection_capacity = capacity.max(1);
        self
    }

    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }

    pub fn deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn disconnect_receipt_wait(mut self, wait: Duration) -> Self {
        self.disconnect_receipt_wait = Some(wait);
        self
    }

    pub fn drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }

    pub fn drain_threshold(mut self, threshold: u64) -> Self {
        self.drain_threshold = threshold;
        self
    }

    /// Always use the CONNECT verb, even for 1.1+ handshakes.
    pub fn connect_verb(mut self) -> Self {
        self.stomp_verb = false;
        self
    }

    pub fn trim_leading_nul(mut self, enabled: bool) -> Self {
        self.trim_leading_nul = enabled;
        self
    }
}

/// Broker settings taken from `STOMP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEnv {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub passcode: String,
    /// Value of the CONNECT `host` header.
    pub vhost: String,
    /// `accept-version` value.
    pub protocol: String,
    /// `heart-beat` value.
    pub heartbeats: String,
}

impl Default for BrokerEnv {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 61613,
            login: "guest".to_string(),
            passcode: "guest".to_string(),
            vhost: "localhost".to_string(),
            protocol: Protocol::V1_2.as_str().to_string(),
            heartbeats: "0,0".to_string(),
        }
    }
}

impl BrokerEnv {
    /// Read `STOMP_HOST`, `STOMP_PORT`, `STOMP_LOGIN`, `STOMP_PASSCODE`,
    /// `STOMP_VHOST`, `STOMP_PROTOCOL` and `STOMP_HEARTBEATS`, falling back
    /// to the defaults for unset or empty variables. `STOMP_VHOST` defaults
    /// to the host.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let host = get("STOMP_HOST").unwrap_or(defaults.host);
        let port = get("STOMP_PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(defaults.port);
        Self {
            vhost: get("STOMP_VHOST").unwrap_or_else(|| host.clone()),
            host,
            port,
            login: get("STOMP_LOGIN").unwrap_or(defaults.login),
            passcode: get("STOMP_PASSCODE").unwrap_or(defaults.passcode),
            protocol: get("STOMP_PROTOCOL").unwrap_or(defaults.protocol),
            heartbeats: get("STOMP_HEARTBEATS").unwrap_or(defaults.heartbeats),
        }
    }

    /// `host:port` for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// CONNECT headers for these settings.
    pub fn connect_headers(&self) -> Headers {
        Headers::new()
            .add(headers::ACCEPT_VERSION, &self.protocol)
            .add(headers::HOST, &self.vhost)
            .add(headers::LOGIN, &self.login)
            .add(headers::PASSCODE, &self.passcode)
            .add(headers::HEART_BEAT, &self.heartbeats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn defaults_without_environment() {
        let env = BrokerEnv::from_lookup(|_| None);
        assert_eq!(env, BrokerEnv::default());
        assert_eq!(env.address(), "localhost:61613");
        let h = env.connect_headers();
        assert_eq!(h.value("accept-version"), Some("1.2"));
        assert_eq!(h.value("heart-beat"), Some("0,0"));
        assert_eq!(h.value("host"), Some("localhost"));
    }

    #[test]
    fn vhost_follows_host_and_bad_port_falls_back() {
        let vars: HashMap<&str, &str> = [
            ("STOMP_HOST", "broker.internal"),
            ("STOMP_PORT", "not-a-port"),
            ("STOMP_HEARTBEATS", "250,250"),
        ]
        .into_iter()
        .collect();
        let env = BrokerEnv::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(env.vhost, "broker.internal");
        assert_eq!(env.port, 61613);
        assert_eq!(env.heartbeats, "250,250");
    }

    #[test]
    fn deadline_callback_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let d = Deadlines::new()
            .write(Duration::from_millis(5))
            .on_expiry(move |e, dir| {
                assert!(matches!(e, ConnError::WriteDeadline));
                assert_eq!(dir, Direction::Write);
                seen.fetch_add(1, Ordering::SeqCst);
            });
        d.notify(&ConnError::WriteDeadline, Direction::Write);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(format!("{:?}", d).contains("on_expiry: true"));
    }

    #[test]
    fn capacities_never_zero() {
        let o = ConnectOptions::new().subscription_capacity(0).outbound_capacity(0);
        assert_eq!(o.subscription_capacity, 1);
        assert_eq!(o.outbound_capacity, 1);
        assert!(o.stomp_verb);
        assert!(!o.connect_verb().stomp_verb);
    }
}
