use std::collections::HashMap;

use super::{ByteCounts, ConnectionKey, IoDirection};

/// Traffic observed on one active connection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Connection {
    /// `ipv4` or `ipv6`.
    #[serde(rename = "type")]
    pub protocol: String,
    #[serde(flatten)]
    pub bytes: ByteCounts,
}

impl Connection {
    fn new(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_owned(),
            bytes: ByteCounts::default(),
        }
    }
}

/// Active connections of a container and the traffic totals across all of them.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    active_connections: HashMap<ConnectionKey, Connection>,
    totals: ByteCounts,
}

impl NetworkStats {
    /// Starts tracking `key` unless it is already tracked.
    ///
    /// Returns `true` if a new entry was created.
    pub fn open(&mut self, key: ConnectionKey, protocol: &str) -> bool {
        let mut created = false;
        self.active_connections.entry(key).or_insert_with(|| {
            created = true;
            Connection::new(protocol)
        });
        created
    }

    /// Adds `bytes` of traffic to the connection identified by `key`.
    ///
    /// Traffic may be reported before the `connect`/`accept` that opened the
    /// socket, in which case the connection is created here.
    pub fn record_io(
        &mut self,
        key: ConnectionKey,
        protocol: &str,
        direction: IoDirection,
        bytes: u64,
    ) -> &Connection {
        self.totals.add(direction, bytes);
        let conn = self
            .active_connections
            .entry(key)
            .or_insert_with(|| Connection::new(protocol));
        conn.bytes.add(direction, bytes);
        conn
    }

    /// Stops tracking `key`, returning its final counters.
    pub fn close(&mut self, key: &ConnectionKey) -> Option<Connection> {
        self.active_connections.remove(key)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.active_connections.get(key)
    }

    pub fn connections(&self) -> impl Iterator<Item = (&ConnectionKey, &Connection)> {
        self.active_connections.iter()
    }

    pub fn len(&self) -> usize {
        self.active_connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_connections.is_empty()
    }

    pub fn totals(&self) -> ByteCounts {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(descriptor: &str) -> ConnectionKey {
        descriptor.parse().unwrap()
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut stats = NetworkStats::default();
        assert!(stats.open(key("10.0.0.1:80->10.0.0.2:5000"), "ipv4"));
        stats.record_io(
            key("10.0.0.1:80->10.0.0.2:5000"),
            "ipv4",
            IoDirection::Read,
            10,
        );
        assert!(!stats.open(key("10.0.0.1:80->10.0.0.2:5000"), "ipv4"));
        assert_eq!(
            stats
                .get(&key("10.0.0.1:80->10.0.0.2:5000"))
                .unwrap()
                .bytes
                .read_in,
            10
        );
    }

    #[test]
    fn test_io_before_open_creates_connection() {
        let mut stats = NetworkStats::default();
        let conn = stats.record_io(key("::1:80->::1:6000"), "ipv6", IoDirection::Write, 42);
        assert_eq!(conn.protocol, "ipv6");
        assert_eq!(conn.bytes.write_out, 42);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats.totals().write_out, 42);
    }

    #[test]
    fn test_close_keeps_totals() {
        let mut stats = NetworkStats::default();
        stats.record_io(key("1.1.1.1:1->2.2.2.2:2"), "ipv4", IoDirection::Read, 7);
        let closed = stats.close(&key("1.1.1.1:1->2.2.2.2:2")).unwrap();
        assert_eq!(closed.bytes.read_in, 7);
        assert!(stats.is_empty());
        assert!(stats.close(&key("1.1.1.1:1->2.2.2.2:2")).is_none());
        assert_eq!(stats.totals().read_in, 7);
    }
}
