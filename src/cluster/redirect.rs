//! Classification of server error replies, including MOVED/ASK redirects.

use crate::cluster::node_key::NodeKey;
use crate::error::{Error, Result};
use crate::resp::Frame;

/// A parsed cluster redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Redirect {
    /// The slot the server redirected.
    pub slot: u16,
    /// Where the server pointed us.
    pub target: NodeKey,
}

impl Redirect {
    pub(crate) fn from_error(err: &Error) -> Option<(Redirect, bool)> {
        match err {
            Error::Moved { slot, address } => {
                NodeKey::parse(address).map(|target| (Redirect { slot: *slot, target }, false))
            }
            Error::Ask { slot, address } => {
                NodeKey::parse(address).map(|target| (Redirect { slot: *slot, target }, true))
            }
            _ => None,
        }
    }
}

/// Converts a reply frame into a result, turning error replies into typed
/// errors. Everything that is not an error frame passes through untouched.
pub(crate) fn reply_to_result(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(text) => Err(error_from_text(&text)),
        other => Ok(other),
    }
}

/// Parses the text of an error reply. `MOVED <slot> <host:port>` and
/// `ASK <slot> <host:port>` become redirect errors; `CLUSTERDOWN` gets its
/// own kind; anything else is a passthrough server error.
pub(crate) fn error_from_text(text: &[u8]) -> Error {
    let message = String::from_utf8_lossy(text);
    let message = message.trim();

    if let Some(rest) = message.strip_prefix("MOVED ") {
        if let Some((slot, address)) = parse_redirect_args(rest) {
            return Error::Moved { slot, address };
        }
    }
    if let Some(rest) = message.strip_prefix("ASK ") {
        if let Some((slot, address)) = parse_redirect_args(rest) {
            return Error::Ask { slot, address };
        }
    }
    if message.starts_with("CLUSTERDOWN") {
        return Error::ClusterDown {
            message: message.to_string(),
        };
    }
    Error::Server {
        message: message.to_string(),
    }
}

/// Redirect arguments: `<slot> <host:port>`.
fn parse_redirect_args(args: &str) -> Option<(u16, String)> {
    let mut parts = args.split_whitespace();
    let slot: u16 = parts.next()?.parse().ok()?;
    let address = parts.next()?;
    if parts.next().is_some() || NodeKey::parse(address).is_none() {
        return None;
    }
    Some((slot, address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moved_reply() {
        let err = error_from_text(b"MOVED 3999 127.0.0.1:7001");
        match err {
            Error::Moved { slot, address } => {
                assert_eq!(slot, 3999);
                assert_eq!(address, "127.0.0.1:7001");
            }
            other => panic!("expected Moved, got {other:?}"),
        }
    }

    #[test]
    fn ask_reply() {
        let err = error_from_text(b"ASK 1234 10.0.0.5:6380");
        match err {
            Error::Ask { slot, address } => {
                assert_eq!(slot, 1234);
                assert_eq!(address, "10.0.0.5:6380");
            }
            other => panic!("expected Ask, got {other:?}"),
        }
    }

    #[test]
    fn clusterdown_reply() {
        let err = error_from_text(b"CLUSTERDOWN Hash slot not served");
        assert!(matches!(err, Error::ClusterDown { .. }));
    }

    #[test]
    fn plain_server_error_passes_through() {
        let err = error_from_text(b"ERR unknown command");
        match err {
            Error::Server { message } => assert_eq!(message, "ERR unknown command"),
            other => panic!("expected Server, got {other:?}"),
        }
    }

    #[test]
    fn malformed_redirects_are_server_errors() {
        assert!(matches!(
            error_from_text(b"MOVED notaslot 127.0.0.1:7000"),
            Error::Server { .. }
        ));
        assert!(matches!(error_from_text(b"MOVED 3999"), Error::Server { .. }));
        assert!(matches!(
            error_from_text(b"MOVED 3999 no-port-here"),
            Error::Server { .. }
        ));
    }

    #[test]
    fn redirect_extraction() {
        let err = error_from_text(b"MOVED 5798 127.0.0.1:7001");
        let (redirect, is_ask) = Redirect::from_error(&err).unwrap();
        assert_eq!(redirect.slot, 5798);
        assert_eq!(redirect.target, NodeKey::new("127.0.0.1", 7001));
        assert!(!is_ask);

        let err = error_from_text(b"ASK 42 127.0.0.1:7002");
        let (_, is_ask) = Redirect::from_error(&err).unwrap();
        assert!(is_ask);

        assert!(Redirect::from_error(&Error::Auth).is_none());
    }

    #[test]
    fn non_error_frames_pass_through() {
        assert_eq!(
            reply_to_result(Frame::Integer(1)).unwrap(),
            Frame::Integer(1)
        );
        assert!(reply_to_result(Frame::Error(b"ERR".to_vec())).is_err());
    }
}
