//! Cross-shard SCAN coordination.
//!
//! A single integer cursor covers every shard: the low 8 bits index into the
//! scan set (one client per shard), the upper bits carry that node's own
//! cursor. `"0"` is both the initial cursor and the terminal one, preserving
//! single-node SCAN semantics across the whole keyspace. The 8-bit index
//! caps coordination at 256 scanning clients.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::cluster::router::ClusterClient;
use crate::error::{Error, Result};
use crate::resp::Frame;

/// Widest cursor the codec can carry: a full 64-bit node cursor shifted by
/// the 8-bit client index still fits in a u128.
pub(crate) const MAX_SCAN_CLIENTS: usize = 256;

/// Splits a global cursor into `(node_cursor, client_index)`.
pub(crate) fn decode_cursor(cursor: &str) -> Result<(u128, usize)> {
    let value: u128 = cursor.trim().parse().map_err(|_| Error::Protocol {
        message: format!("malformed scan cursor: {cursor:?}"),
    })?;
    Ok((value >> 8, (value & 0xff) as usize))
}

/// Combines `(node_cursor, client_index)` into a global cursor.
pub(crate) fn encode_cursor(node_cursor: u128, client_index: usize) -> String {
    ((node_cursor << 8) | client_index as u128).to_string()
}

/// Pulls `(cursor, keys)` out of a node's SCAN/SSCAN/HSCAN/ZSCAN reply.
pub(crate) fn parse_scan_reply(frame: Frame) -> Result<(u128, Vec<Bytes>)> {
    let mut items = frame
        .into_array()
        .ok_or_else(|| malformed("reply is not an array"))?
        .into_iter();
    let cursor = items
        .next()
        .and_then(|f| f.as_text())
        .and_then(|s| s.parse::<u128>().ok())
        .ok_or_else(|| malformed("missing cursor"))?;
    let keys = items
        .next()
        .and_then(Frame::into_array)
        .ok_or_else(|| malformed("missing element list"))?
        .into_iter()
        .filter_map(|f| f.as_bulk().cloned())
        .collect();
    Ok((cursor, keys))
}

fn malformed(what: &str) -> Error {
    Error::Protocol {
        message: format!("malformed SCAN reply: {what}"),
    }
}

/// Options shared by `SCAN` and the per-key scan variants.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pattern: Option<String>,
    count: Option<u64>,
}

impl ScanOptions {
    /// Restricts iteration to keys matching a glob pattern (`MATCH`).
    pub fn match_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Hints the per-call batch size (`COUNT`).
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub(crate) fn to_args(&self) -> Vec<Bytes> {
        let mut args = Vec::new();
        if let Some(pattern) = &self.pattern {
            args.push(Bytes::from_static(b"MATCH"));
            args.push(Bytes::from(pattern.clone()));
        }
        if let Some(count) = self.count {
            args.push(Bytes::from_static(b"COUNT"));
            args.push(Bytes::from(count.to_string()));
        }
        args
    }
}

/// Lazy cross-shard key iterator returned by
/// [`ClusterClient::scan`](crate::ClusterClient::scan).
///
/// Keys present for the entire iteration are yielded at least once; keys
/// created or deleted concurrently may or may not appear, matching
/// single-node SCAN guarantees.
#[derive(Debug)]
pub struct Scanner {
    client: ClusterClient,
    args: Vec<Bytes>,
    cursor: String,
    buffer: VecDeque<Bytes>,
    finished: bool,
}

impl Scanner {
    pub(crate) fn new(client: ClusterClient, options: ScanOptions) -> Self {
        Self {
            client,
            args: options.to_args(),
            cursor: "0".to_string(),
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    /// The next key, or `None` once every shard is exhausted.
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(key) = self.buffer.pop_front() {
                return Ok(Some(key));
            }
            if self.finished {
                return Ok(None);
            }
            let (next_cursor, keys) = self.client.scan_step(&self.cursor, &self.args).await?;
            self.finished = next_cursor == "0";
            self.cursor = next_cursor;
            self.buffer.extend(keys);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        for (raw, index) in [(0u128, 0usize), (1, 0), (0, 7), (12345, 255), (u64::MAX as u128, 3)] {
            let encoded = encode_cursor(raw, index);
            assert_eq!(decode_cursor(&encoded).unwrap(), (raw, index));
        }
    }

    #[test]
    fn initial_cursor_is_client_zero() {
        assert_eq!(decode_cursor("0").unwrap(), (0, 0));
    }

    #[test]
    fn full_width_node_cursor_survives() {
        // A 64-bit node cursor must not be truncated by the index shift.
        let encoded = encode_cursor(u64::MAX as u128, 255);
        let (raw, index) = decode_cursor(&encoded).unwrap();
        assert_eq!(raw, u64::MAX as u128);
        assert_eq!(index, 255);
    }

    #[test]
    fn bad_cursor_is_rejected() {
        assert!(decode_cursor("not-a-number").is_err());
        assert!(decode_cursor("").is_err());
    }

    #[test]
    fn scan_reply_parsing() {
        let frame = Frame::Array(vec![
            Frame::bulk("42"),
            Frame::Array(vec![Frame::bulk("a"), Frame::bulk("b")]),
        ]);
        let (cursor, keys) = parse_scan_reply(frame).unwrap();
        assert_eq!(cursor, 42);
        assert_eq!(keys, vec![Bytes::from("a"), Bytes::from("b")]);

        assert!(parse_scan_reply(Frame::Integer(1)).is_err());
        assert!(parse_scan_reply(Frame::Array(vec![Frame::bulk("0")])).is_err());
    }

    #[test]
    fn options_render_their_args() {
        let args = ScanOptions::default()
            .match_pattern("user:*")
            .count(100)
            .to_args();
        assert_eq!(
            args,
            vec![
                Bytes::from("MATCH"),
                Bytes::from("user:*"),
                Bytes::from("COUNT"),
                Bytes::from("100"),
            ]
        );
        assert!(ScanOptions::default().to_args().is_empty());
    }
}
