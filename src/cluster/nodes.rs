//! Parsing of `CLUSTER NODES` output into node records.
//!
//! Line format:
//! `<id> <ip:port@cport[,hostname]> <flags> <primary> <ping-sent> <pong-recv>
//! <config-epoch> <link-state> <slot> <slot> ...`

use crate::cluster::node_key::NodeKey;
use crate::error::{Error, Result};

/// Role of a node within its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns slots and serves writes.
    Primary,
    /// Replicates a primary.
    Replica,
}

/// One node as reported by `CLUSTER NODES`.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// The 40-char node id assigned by the cluster.
    pub id: String,
    /// The endpoint clients talk to.
    pub key: NodeKey,
    /// Primary or replica.
    pub role: Role,
    /// For replicas, the id of the replicated primary.
    pub primary_id: Option<String>,
    /// Owned slot ranges, inclusive on both ends. Empty for replicas.
    pub slots: Vec<(u16, u16)>,
    /// Whether the reporting node sees this node's link as up and the node
    /// not failed.
    pub available: bool,
}

impl NodeRecord {
    /// True for available primaries, the only nodes eligible for the slot map.
    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }
}

/// Parses a full `CLUSTER NODES` reply. Lines that do not look like node
/// lines are skipped; an output with no primaries is rejected.
pub fn parse_cluster_nodes(text: &str) -> Result<Vec<NodeRecord>> {
    let records: Vec<NodeRecord> = text.lines().filter_map(parse_line).collect();
    if !records.iter().any(NodeRecord::is_primary) {
        return Err(Error::Protocol {
            message: "CLUSTER NODES reported no primary nodes".to_string(),
        });
    }
    Ok(records)
}

fn parse_line(line: &str) -> Option<NodeRecord> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }

    let id = parts[0].to_string();
    let key = parse_address(parts[1])?;

    let flags: Vec<&str> = parts[2].split(',').collect();
    let role = if flags.contains(&"master") {
        Role::Primary
    } else if flags.contains(&"slave") || flags.contains(&"replica") {
        Role::Replica
    } else {
        return None;
    };

    let primary_id = match (role, parts[3]) {
        (Role::Replica, "-") => None,
        (Role::Replica, primary) => Some(primary.to_string()),
        (Role::Primary, _) => None,
    };

    let connected = parts[7] == "connected";
    let failed = flags.iter().any(|f| *f == "fail" || *f == "fail?" || *f == "noaddr");

    let mut slots = Vec::new();
    if role == Role::Primary {
        for range in &parts[8..] {
            if let Some(range) = parse_slot_range(range) {
                slots.push(range);
            }
        }
    }

    Some(NodeRecord {
        id,
        key,
        role,
        primary_id,
        slots,
        available: connected && !failed,
    })
}

/// Address forms: `ip:port@cport`, `ip:port`, and the managed-service
/// variant `ip:port@cport,hostname`. The cluster bus port is irrelevant to
/// clients and dropped.
fn parse_address(addr: &str) -> Option<NodeKey> {
    let addr = addr.split(',').next()?;
    let addr = addr.split('@').next()?;
    NodeKey::parse(addr)
}

/// Slot entries are either `start-end` or a single slot. Migrating and
/// importing annotations (`[slot->-id]`, `[slot-<-id]`) are skipped; the
/// redirect loop discovers those slots' owners on demand.
fn parse_slot_range(entry: &str) -> Option<(u16, u16)> {
    if entry.starts_with('[') {
        return None;
    }
    match entry.split_once('-') {
        Some((start, end)) => {
            let start: u16 = start.parse().ok()?;
            let end: u16 = end.parse().ok()?;
            Some((start, end))
        }
        None => {
            let slot: u16 = entry.parse().ok()?;
            Some((slot, slot))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30001@31001 myself,master - 0 1426238316232 1 connected 0-5460
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30003@31003 master - 0 1426238316232 3 connected 10923-16383
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30004@31004 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 1426238316232 1 connected
";

    #[test]
    fn parses_primaries_and_replicas() {
        let records = parse_cluster_nodes(FIXTURE).unwrap();
        assert_eq!(records.len(), 4);

        let primaries: Vec<&NodeRecord> = records.iter().filter(|r| r.is_primary()).collect();
        assert_eq!(primaries.len(), 3);
        assert_eq!(primaries[0].key, NodeKey::new("127.0.0.1", 30001));
        assert_eq!(primaries[0].slots, vec![(0, 5460)]);

        let replica = records.iter().find(|r| r.role == Role::Replica).unwrap();
        assert_eq!(
            replica.primary_id.as_deref(),
            Some("07c37dfeb235213a872192d90877d0cd55635b91")
        );
        assert!(replica.slots.is_empty());
        assert!(replica.available);
    }

    #[test]
    fn skips_migrating_slot_annotations() {
        let line = "abc 127.0.0.1:7000@17000 master - 0 0 1 connected 0-100 [101->-def]";
        let record = parse_line(line).unwrap();
        assert_eq!(record.slots, vec![(0, 100)]);
    }

    #[test]
    fn single_slot_entry() {
        let line = "abc 127.0.0.1:7000@17000 master - 0 0 1 connected 42";
        let record = parse_line(line).unwrap();
        assert_eq!(record.slots, vec![(42, 42)]);
    }

    #[test]
    fn failed_node_is_unavailable() {
        let line = "abc 127.0.0.1:7000@17000 master,fail - 0 0 1 connected 0-100";
        let record = parse_line(line).unwrap();
        assert!(!record.available);

        let line = "abc 127.0.0.1:7000@17000 slave def 0 0 1 disconnected";
        let record = parse_line(line).unwrap();
        assert!(!record.available);
    }

    #[test]
    fn managed_service_hostname_suffix() {
        let line = "abc 10.0.0.1:6379@16379,node-0.cache.example.com master - 0 0 1 connected 0-16383";
        let record = parse_line(line).unwrap();
        assert_eq!(record.key, NodeKey::new("10.0.0.1", 6379));
    }

    #[test]
    fn no_primaries_is_an_error() {
        let text = "abc 127.0.0.1:7000@17000 slave def 0 0 1 connected\n";
        assert!(parse_cluster_nodes(text).is_err());
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let text = format!("vvv short line\n{FIXTURE}");
        let records = parse_cluster_nodes(&text).unwrap();
        assert_eq!(records.len(), 4);
    }
}
