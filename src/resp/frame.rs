use bytes::Bytes;

/// A RESP2 protocol frame.
///
/// Covers every reply shape the cluster router has to aggregate: status
/// strings, server errors, integers, binary-safe bulk strings, arrays, and
/// the null reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (`+OK`).
    SimpleString(Vec<u8>),
    /// Error (`-ERR ...`).
    Error(Vec<u8>),
    /// Integer (`:1000`).
    Integer(i64),
    /// Bulk string (`$6\r\nfoobar`); `None` is the null bulk string.
    BulkString(Option<Bytes>),
    /// Array (`*2\r\n...`).
    Array(Vec<Frame>),
    /// Null array (`*-1`).
    Null,
}

impl Frame {
    /// Builds a bulk string frame from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::BulkString(Some(data.into()))
    }

    /// The textual content of a simple or bulk string reply.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Frame::SimpleString(s) => Some(String::from_utf8_lossy(s).into_owned()),
            Frame::BulkString(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// The integer content of an integer reply.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The raw bytes of a bulk string reply.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Frame::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Consumes an array reply into its elements.
    pub fn into_array(self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(items) => Some(items),
            _ => None,
        }
    }

    /// True if this frame is the null reply (either form).
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_accessors() {
        assert_eq!(
            Frame::SimpleString(b"OK".to_vec()).as_text(),
            Some("OK".to_string())
        );
        assert_eq!(Frame::bulk("value").as_text(), Some("value".to_string()));
        assert_eq!(Frame::Integer(3).as_text(), None);
    }

    #[test]
    fn int_accessor() {
        assert_eq!(Frame::Integer(42).as_int(), Some(42));
        assert_eq!(Frame::bulk("42").as_int(), None);
    }

    #[test]
    fn array_accessor() {
        let items = vec![Frame::Integer(1), Frame::Integer(2)];
        assert_eq!(Frame::Array(items.clone()).into_array(), Some(items));
        assert_eq!(Frame::Null.into_array(), None);
    }

    #[test]
    fn null_forms() {
        assert!(Frame::Null.is_null());
        assert!(Frame::BulkString(None).is_null());
        assert!(!Frame::bulk("").is_null());
    }
}
