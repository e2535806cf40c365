//! Error taxonomy for the whole crate.
//!
//! Cluster redirections (`Moved`/`Ask`) are modeled as errors because that is
//! how the server reports them; the router consumes them internally up to its
//! retry budget and they are never surfaced on a successful call.

use std::io;

use thiserror::Error;

/// Result type alias for shardis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors crossing the public surface of the cluster client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred on a node connection.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// The peer sent bytes that do not form a valid RESP frame, or a reply
    /// of an unexpected shape.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error reply that is not a cluster redirect.
    #[error("server error: {message}")]
    Server {
        /// Error message from the server.
        message: String,
    },

    /// Authentication handshake failed.
    #[error("authentication failed")]
    Auth,

    /// Malformed client configuration: bad seed URL, unknown scheme,
    /// non-integer db or port.
    #[error("invalid client config: {message}")]
    InvalidClientConfig {
        /// Description of the invalid option.
        message: String,
    },

    /// No seed endpoint produced a usable topology.
    #[error("cluster setup failed: {}", .errors.join("; "))]
    InitialSetup {
        /// Per-seed failure descriptions.
        errors: Vec<String>,
    },

    /// The command reconfigures the cluster (or a connection's read mode)
    /// and is rejected rather than routed.
    #[error("cluster orchestration command not supported: {command}")]
    OrchestrationCommandNotSupported {
        /// The rejected command (and subcommand, if any).
        command: String,
    },

    /// A transaction verb was used outside a transactional wrapper, so no
    /// single node can be determined.
    #[error("cannot determine a node for {command} outside a transaction")]
    AmbiguousNode {
        /// The offending command.
        command: String,
    },

    /// After a refresh triggered by a connection failure, the originally
    /// targeted node is no longer part of the cluster.
    #[error("node might be down: {address}")]
    NodeMightBeDown {
        /// The unreachable node, as `host:port`.
        address: String,
    },

    /// Permanent redirect: the slot has been reassigned to another node.
    #[error("MOVED slot {slot} to {address}")]
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// The node now owning the slot, as `host:port`.
        address: String,
    },

    /// Per-request redirect during slot migration. The slot map must not
    /// be updated for ASK.
    #[error("ASK slot {slot} at {address}")]
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// The node temporarily serving the slot, as `host:port`.
        address: String,
    },

    /// The cluster reported itself down.
    #[error("cluster is down: {message}")]
    ClusterDown {
        /// The server's CLUSTERDOWN message.
        message: String,
    },
}

impl Error {
    /// True for failures of the transport itself, as opposed to errors the
    /// server reported over a healthy connection. Connection failures make
    /// the router refresh its topology before re-raising.
    pub(crate) fn is_connection_error(&self) -> bool {
        matches!(self, Error::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_server_error() {
        let err = Error::Server {
            message: "ERR wrong number of arguments".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server error: ERR wrong number of arguments"
        );
    }

    #[test]
    fn display_initial_setup_joins_causes() {
        let err = Error::InitialSetup {
            errors: vec![
                "127.0.0.1:7000: connection refused".to_string(),
                "127.0.0.1:7001: timed out".to_string(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:7000: connection refused"));
        assert!(text.contains("127.0.0.1:7001: timed out"));
    }

    #[test]
    fn display_redirects() {
        let moved = Error::Moved {
            slot: 5798,
            address: "127.0.0.1:7001".to_string(),
        };
        assert_eq!(moved.to_string(), "MOVED slot 5798 to 127.0.0.1:7001");

        let ask = Error::Ask {
            slot: 1234,
            address: "127.0.0.1:7002".to_string(),
        };
        assert_eq!(ask.to_string(), "ASK slot 1234 at 127.0.0.1:7002");
    }

    #[test]
    fn connection_error_classification() {
        let io = Error::Io {
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(io.is_connection_error());

        let server = Error::Server {
            message: "ERR".to_string(),
        };
        assert!(!server.is_connection_error());
    }
}
