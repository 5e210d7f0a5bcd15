use std::fmt;

use tracing::debug;

use crate::error::ConnError;

/// STOMP protocol level spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Protocol {
    #[default]
    V1_0,
    V1_1,
    V1_2,
}

impl Protocol {
    /// Every level this engine can speak, lowest first.
    pub const SUPPORTED: [Protocol; 3] = [Protocol::V1_0, Protocol::V1_1, Protocol::V1_2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::V1_0 => "1.0",
            Protocol::V1_1 => "1.1",
            Protocol::V1_2 => "1.2",
        }
    }

    /// Parse a version token such as `"1.2"`. Unknown tokens yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.0" => Some(Protocol::V1_0),
            "1.1" => Some(Protocol::V1_1),
            "1.2" => Some(Protocol::V1_2),
            _ => None,
        }
    }

    /// Header escaping applies from 1.1 onward.
    pub fn escapes_headers(&self) -> bool {
        *self >= Protocol::V1_1
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split an `accept-version` value into its version tokens.
pub fn requested_versions(accept_version: &str) -> Vec<&str> {
    accept_version
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

/// Check a client `accept-version` value before anything is written.
///
/// At least one requested version must be one this engine supports.
pub fn check_client_versions(accept_version: &str) -> Result<(), ConnError> {
    if requested_versions(accept_version)
        .into_iter()
        .any(|v| Protocol::parse(v).is_some())
    {
        Ok(())
    } else {
        Err(ConnError::UnsupportedClientVersion(
            accept_version.to_string(),
        ))
    }
}

/// Decide the effective protocol from the client's `accept-version` and
/// the broker's `version` header.
///
/// An absent client list counts as the implicit list `["1.0"]`; an absent
/// broker version counts as `"1.0"`.
///
/// | client            | broker  | result                         |
/// |-------------------|---------|--------------------------------|
/// | absent            | absent  | 1.0                            |
/// | any               | `v`     | `v` if requested and supported |
/// | any               | `v`     | client mismatch if not requested |
/// | any               | `v`     | server mismatch if unsupported |
/// | present           | absent  | 1.0                            |
pub fn negotiate_protocol(
    accept_version: Option<&str>,
    server_version: Option<&str>,
) -> Result<Protocol, ConnError> {
    let client = accept_version.map(str::trim).filter(|s| !s.is_empty());
    let server = server_version.map(str::trim).filter(|s| !s.is_empty());

    match (client, server) {
        (None, None) => Ok(Protocol::V1_0),
        (client, Some(server)) => {
            let requested = client.map(requested_versions).unwrap_or_else(|| vec!["1.0"]);
            if !requested.contains(&server) {
                return Err(ConnError::ClientVersionMismatch {
                    client: client.unwrap_or_default().to_string(),
                    server: server.to_string(),
                });
            }
            Protocol::parse(server)
                .ok_or_else(|| ConnError::ServerVersionMismatch(server.to_string()))
        }
        (Some(client), None) => {
            if requested_versions(client).contains(&"1.0") {
                debug!(accept_version = client, "broker sent no version, falling back to 1.0");
            } else {
                debug!(
                    accept_version = client,
                    "broker sent no version and 1.0 was not requested, using implicit 1.0"
                );
            }
            Ok(Protocol::V1_0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_version() {
        assert!(Protocol::V1_0 < Protocol::V1_1);
        assert!(Protocol::V1_1 < Protocol::V1_2);
        assert!(!Protocol::V1_0.escapes_headers());
        assert!(Protocol::V1_2.escapes_headers());
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(Protocol::parse("1.2"), Some(Protocol::V1_2));
        assert_eq!(Protocol::parse(" 1.1 "), Some(Protocol::V1_1));
        assert_eq!(Protocol::parse("9.9"), None);
        assert_eq!(Protocol::parse(""), None);
    }

    #[test]
    fn client_version_check() {
        assert!(check_client_versions("1.0,1.1,1.2").is_ok());
        assert!(check_client_versions("9.9,1.2").is_ok());
        assert!(matches!(
            check_client_versions("9.9"),
            Err(ConnError::UnsupportedClientVersion(_))
        ));
    }

    #[test]
    fn negotiation_table() {
        assert_eq!(
            negotiate_protocol(Some("1.1,1.2"), Some("1.2")).unwrap(),
            Protocol::V1_2
        );
        assert_eq!(negotiate_protocol(None, None).unwrap(), Protocol::V1_0);
        assert_eq!(
            negotiate_protocol(Some("1.1"), Some("1.1")).unwrap(),
            Protocol::V1_1
        );
        assert_eq!(
            negotiate_protocol(Some("1.0,1.1"), None).unwrap(),
            Protocol::V1_0
        );
        assert_eq!(negotiate_protocol(Some("1.2"), None).unwrap(), Protocol::V1_0);
        assert_eq!(negotiate_protocol(None, Some("1.0")).unwrap(), Protocol::V1_0);
    }

    #[test]
    fn negotiation_mismatches() {
        assert!(matches!(
            negotiate_protocol(Some("1.1"), Some("1.2")),
            Err(ConnError::ClientVersionMismatch { .. })
        ));
        assert!(matches!(
            negotiate_protocol(None, Some("1.1")),
            Err(ConnError::ClientVersionMismatch { .. })
        ));
        assert!(matches!(
            negotiate_protocol(Some("1.2,2.0"), Some("2.0")),
            Err(ConnError::ServerVersionMismatch(_))
        ));
    }
}
