//! Cluster endpoint identity: the `host:port` pair.

use std::fmt;

/// The identity of a cluster endpoint across the topology.
///
/// Two keys are equal when both host and port match. Ordering is lexical on
/// host, then numeric on port, which makes sorted node-key lists (fan-out
/// order, client ids) deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    host: String,
    port: u16,
}

impl NodeKey {
    /// Creates a key from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`. The port separator is searched from the right so
    /// bracketed IPv6 hosts (`[::1]:7000`) parse; brackets are stripped.
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }

    /// The host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The same endpoint with the host replaced. Used for the fixed-hostname
    /// override when traffic goes through a proxy with a single SNI.
    pub fn with_host(&self, host: &str) -> Self {
        Self::new(host, self.port)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
