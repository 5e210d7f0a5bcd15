use clap::Parser;
use osmium_stomp::BrokerEnv;

/// Command line settings. Anything left unset falls back to the `STOMP_*`
/// environment variables, then to the built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Interactive STOMP client")]
pub struct Cli {
    /// Broker host
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port
    #[arg(long)]
    pub port: Option<u16>,

    /// Login username
    #[arg(short, long)]
    pub login: Option<String>,

    /// Passcode
    #[arg(short, long)]
    pub passcode: Option<String>,

    /// Virtual host sent in the CONNECT `host` header
    #[arg(long)]
    pub vhost: Option<String>,

    /// Comma separated protocol versions to offer, e.g. "1.1,1.2"
    #[arg(long)]
    pub protocol: Option<String>,

    /// Heart-beat settings (client-send,client-receive in ms)
    #[arg(long)]
    pub heartbeat: Option<String>,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short, long)]
    pub subscribe: Vec<String>,

    /// Send this body once after connecting
    #[arg(long, requires = "destination")]
    pub send: Option<String>,

    /// Destination for --send
    #[arg(short, long)]
    pub destination: Option<String>,

    /// Print connection statistics on exit
    #[arg(long)]
    pub summary: bool,
}

impl Cli {
    /// Merge the flags over the environment.
    pub fn broker(&self) -> BrokerEnv {
        self.merge(BrokerEnv::from_env())
    }

    fn merge(&self, mut env: BrokerEnv) -> BrokerEnv {
        if let Some(host) = &self.host {
            if self.vhost.is_none() && env.vhost == env.host {
                env.vhost = host.clone();
            }
            env.host = host.clone();
        }
        if let Some(port) = self.port {
            env.port = port;
        }
        if let Some(login) = &self.login {
            env.login = login.clone();
        }
        if let Some(passcode) = &self.passcode {
            env.passcode = passcode.clone();
        }
        if let Some(vhost) = &self.vhost {
            env.vhost = vhost.clone();
        }
        if let Some(protocol) = &self.protocol {
            env.protocol = protocol.clone();
        }
        if let Some(heartbeat) = &self.heartbeat {
            env.heartbeats = heartbeat.clone();
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment() {
        let cli = Cli::parse_from(["stomp", "--host", "mq.local", "--port", "1234", "-l", "bob"]);
        let env = cli.merge(BrokerEnv::default());
        assert_eq!(env.address(), "mq.local:1234");
        assert_eq!(env.login, "bob");
        assert_eq!(env.vhost, "mq.local");
        assert_eq!(env.passcode, "guest");
    }

    #[test]
    fn explicit_vhost_wins() {
        let cli = Cli::parse_from(["stomp", "--host", "mq.local", "--vhost", "/"]);
        let env = cli.merge(BrokerEnv::default());
        assert_eq!(env.vhost, "/");
    }

    #[test]
    fn repeated_subscribe() {
        let cli = Cli::parse_from(["stomp", "-s", "/queue/a", "-s", "/topic/b"]);
        assert_eq!(cli.subscribe, vec!["/queue/a", "/topic/b"]);
    }

    #[test]
    fn send_requires_destination() {
        assert!(Cli::try_parse_from(["stomp", "--send", "hi"]).is_err());
        let cli = Cli::try_parse_from(["stomp", "--send", "hi", "-d", "/queue/a"]).unwrap();
        assert_eq!(cli.send.as_deref(), Some("hi"));
    }
}
