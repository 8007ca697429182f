//! Parsing of tracer socket descriptors into [`ConnectionKey`]s.
//!
//! The tracer renders a socket as `<source>-><dest>` where each side is
//! `ip:port`. IPv6 addresses contain colons themselves, so the port is always
//! taken from the text after the *last* colon of each side.
//!
//! # Example
//!
//! ```rust
//! use sysdig_monitor::stats::ConnectionKey;
//!
//! let key: ConnectionKey = "172.17.0.2:45678->10.0.0.1:80".parse().unwrap();
//! assert_eq!(key.source_ip, "172.17.0.2");
//! assert_eq!(key.dest_port, 80);
//! assert_eq!(key.to_string(), "172.17.0.2:45678->10.0.0.1:80");
//! ```

use std::fmt;
use std::str::FromStr;

use super::ParseConnectionError;

const SEPARATOR: &str = "->";

/// Identifies one directional connection observed inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ConnectionKey {
    pub source_ip: String,
    pub source_port: u16,
    pub dest_ip: String,
    pub dest_port: u16,
}

impl ConnectionKey {
    /// Label values in `src_ip, src_port, dest_ip, dest_port` order.
    pub fn label_values(&self) -> [String; 4] {
        [
            self.source_ip.clone(),
            self.source_port.to_string(),
            self.dest_ip.clone(),
            self.dest_port.to_string(),
        ]
    }
}

impl FromStr for ConnectionKey {
    type Err = ParseConnectionError;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let mut parts = descriptor.split(SEPARATOR);
        let (Some(source), Some(dest), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseConnectionError::WrongFormat(descriptor.to_owned()));
        };
        let (source_ip, source_port) = split_address(source)?;
        let (dest_ip, dest_port) = split_address(dest)?;

        Ok(Self {
            source_ip: source_ip.to_owned(),
            source_port,
            dest_ip: dest_ip.to_owned(),
            dest_port,
        })
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}{SEPARATOR}{}:{}",
            self.source_ip, self.source_port, self.dest_ip, self.dest_port
        )
    }
}

/// Splits `host:port` at the last colon.
fn split_address(address: &str) -> Result<(&str, u16), ParseConnectionError> {
    let wrong_format = || ParseConnectionError::WrongFormat(address.to_owned());
    let (host, port) = address.rsplit_once(':').ok_or_else(wrong_format)?;
    if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(wrong_format());
    }
    let port = port.parse::<u16>().map_err(|_| wrong_format())?;

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrong_format(s: &str) -> ParseConnectionError {
        ParseConnectionError::WrongFormat(s.to_owned())
    }

    #[test]
    fn test_parse_ipv4_descriptor() {
        let key = ConnectionKey::from_str("127.0.0.1:8080->192.168.1.4:52144").unwrap();
        assert_eq!(
            key,
            ConnectionKey {
                source_ip: "127.0.0.1".to_owned(),
                source_port: 8080,
                dest_ip: "192.168.1.4".to_owned(),
                dest_port: 52144,
            }
        );
    }

    #[test]
    fn test_parse_ipv6_descriptor_uses_last_colon() {
        let key = ConnectionKey::from_str("::1:443->fe80::2:60000").unwrap();
        assert_eq!(key.source_ip, "::1");
        assert_eq!(key.source_port, 443);
        assert_eq!(key.dest_ip, "fe80::2");
        assert_eq!(key.dest_port, 60000);
    }

    #[test]
    fn test_display_round_trips() {
        for descriptor in [
            "10.0.0.1:1->10.0.0.2:2",
            "::1:443->::1:0",
            "0.0.0.0:65535->255.255.255.255:22",
        ] {
            let key = ConnectionKey::from_str(descriptor).unwrap();
            assert_eq!(key.to_string(), descriptor);
            assert_eq!(ConnectionKey::from_str(&key.to_string()).unwrap(), key);
        }
    }

    #[test]
    fn test_missing_destination() {
        let err = ConnectionKey::from_str("10.0.0.1->").unwrap_err();
        assert!(matches!(err, ParseConnectionError::WrongFormat(_)));
    }

    #[test]
    fn test_separator_count() {
        assert!(ConnectionKey::from_str("10.0.0.1:80").is_err());
        assert!(ConnectionKey::from_str("1.1.1.1:1->2.2.2.2:2->3.3.3.3:3").is_err());
    }

    #[test]
    fn test_invalid_addresses() {
        assert_eq!(
            ConnectionKey::from_str(":80->10.0.0.1:80").unwrap_err(),
            wrong_format(":80")
        );
        assert_eq!(
            ConnectionKey::from_str("10.0.0.1:->10.0.0.1:80").unwrap_err(),
            wrong_format("10.0.0.1:")
        );
        assert_eq!(
            ConnectionKey::from_str("10.0.0.1:-1->10.0.0.1:80").unwrap_err(),
            wrong_format("10.0.0.1:-1")
        );
        assert_eq!(
            ConnectionKey::from_str("10.0.0.1:80->10.0.0.1:+80").unwrap_err(),
            wrong_format("10.0.0.1:+80")
        );
        assert_eq!(
            ConnectionKey::from_str("10.0.0.1:80->10.0.0.1:70000").unwrap_err(),
            wrong_format("10.0.0.1:70000")
        );
        assert_eq!(
            ConnectionKey::from_str("/var/run/docker.sock").unwrap_err(),
            wrong_format("/var/run/docker.sock")
        );
    }
}
