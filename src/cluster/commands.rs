//! Per-command routing policy.
//!
//! Every command name maps to a routing class (single node by key slot,
//! fan-out to a node set, nested subcommand dispatch, or outright rejection),
//! a first-key position for slot derivation, and a read-only flag deciding
//! replica eligibility. Fan-out classes carry the aggregation rule applied to
//! the per-node replies.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::node::command::Cmd;
use crate::resp::Frame;

/// How a command reaches the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingClass {
    /// One node, chosen by the slot of the first key (or sampled when the
    /// command carries no key).
    Single,
    /// Every node, primaries and replicas.
    AllNodes,
    /// Every primary.
    AllPrimaries,
    /// The read-serving set: one node per shard, replicas preferred when
    /// replica reads are enabled.
    AllReplicas,
    /// The cross-shard scan coordinator.
    Scan,
    /// Dispatch again on the subcommand (argument 1).
    Subcommand,
    /// Cluster orchestration; rejected.
    Rejected,
    /// Transaction verb outside a transaction; no node can be determined.
    Ambiguous,
}

/// Deterministic rule combining per-node replies of a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// The first reply, in node-key order.
    First,
    /// Integer sum of all replies.
    Sum,
    /// Integer replies as a sorted list.
    SortedInts,
    /// One array with every node's reply, in node-key order.
    PerNode,
    /// Array replies concatenated (bulk-string replies: text concatenated).
    Flatten,
    /// Array elements concatenated and sorted.
    ConcatSorted,
    /// Array elements concatenated, deduplicated, and sorted.
    ConcatUniqueSorted,
    /// Replies are `[name, count, ...]` maps; merged with counts summed.
    MergeCountMaps,
}

/// Routing entry for one command name.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Position of the first key argument; 0 for keyless commands.
    pub first_key: usize,
    /// Whether a replica may serve the command.
    pub readonly: bool,
    /// The routing class.
    pub routing: RoutingClass,
    /// Aggregation rule, meaningful for the fan-out classes.
    pub aggregate: Aggregate,
}

impl CommandSpec {
    const fn single(first_key: usize, readonly: bool) -> Self {
        Self {
            first_key,
            readonly,
            routing: RoutingClass::Single,
            aggregate: Aggregate::First,
        }
    }

    const fn fan_out(routing: RoutingClass, aggregate: Aggregate) -> Self {
        Self {
            first_key: 0,
            readonly: false,
            routing,
            aggregate,
        }
    }
}

/// Looks up the routing entry for a lowercased command name.
///
/// Unknown commands default to single-node routing with the key at
/// position 1 and primary-only dispatch, which is correct for the long tail
/// of keyed write commands.
pub fn command_spec(name: &str) -> CommandSpec {
    use Aggregate::*;
    use RoutingClass::*;

    match name {
        // Connection-mode and shutdown verbs would desynchronize the pool.
        "readonly" | "readwrite" | "shutdown" => CommandSpec::fan_out(Rejected, First),

        // Transaction verbs need a transactional wrapper to pin a node.
        "multi" | "exec" | "discard" | "unwatch" => CommandSpec::fan_out(Ambiguous, First),

        // Whole-cluster maintenance, first reply wins.
        "acl" | "auth" | "bgrewriteaof" | "bgsave" | "quit" | "save" => {
            CommandSpec::fan_out(AllNodes, First)
        }
        "lastsave" => CommandSpec::fan_out(AllNodes, SortedInts),
        "role" => CommandSpec::fan_out(AllNodes, PerNode),

        "flushall" | "flushdb" => CommandSpec::fan_out(AllPrimaries, First),
        "wait" => CommandSpec::fan_out(AllPrimaries, Sum),

        // Keyspace-wide reads go to the read-serving set.
        "keys" => CommandSpec::fan_out(AllReplicas, ConcatSorted),
        "dbsize" => CommandSpec::fan_out(AllReplicas, Sum),

        "scan" => CommandSpec::fan_out(Scan, First),

        // Nested dispatch on argument 1.
        "cluster" | "client" | "memory" | "script" | "config" | "pubsub" => {
            CommandSpec::fan_out(Subcommand, First)
        }

        // Keyless commands, sampled onto an arbitrary primary.
        "ping" | "echo" | "info" | "time" | "command" | "hello" | "select" | "lolwut"
        | "debug" | "slowlog" | "latency" | "function" | "failover" | "reset" => {
            CommandSpec::single(0, false)
        }
        "randomkey" => CommandSpec::single(0, true),

        // The EVAL family carries keys after the numkeys argument.
        "eval" | "evalsha" | "fcall" => CommandSpec::single(3, false),
        "eval_ro" | "evalsha_ro" | "fcall_ro" => CommandSpec::single(3, true),

        "object" => CommandSpec::single(2, true),

        // Single-key reads a replica may serve.
        "get" | "getrange" | "getbit" | "mget" | "strlen" | "substr" | "exists" | "type"
        | "ttl" | "pttl" | "expiretime" | "pexpiretime" | "dump" | "touch" | "lcs"
        | "llen" | "lrange" | "lindex" | "lpos"
        | "hget" | "hmget" | "hgetall" | "hlen" | "hkeys" | "hvals" | "hstrlen"
        | "hexists" | "hrandfield"
        | "scard" | "sismember" | "smismember" | "smembers" | "srandmember" | "sdiff"
        | "sinter" | "sintercard" | "sunion"
        | "zcard" | "zcount" | "zscore" | "zmscore" | "zrank" | "zrevrank" | "zrange"
        | "zrangebyscore" | "zrangebylex" | "zrevrange" | "zrevrangebyscore"
        | "zrevrangebylex" | "zrandmember" | "zlexcount" | "zdiff" | "zinter" | "zunion"
        | "bitcount" | "bitpos" | "getex"
        | "geodist" | "geopos" | "geohash" | "geosearch"
        | "xlen" | "xrange" | "xrevrange"
        | "sscan" | "hscan" | "zscan" => CommandSpec::single(1, true),

        // Everything else: keyed write, primary only.
        _ => CommandSpec::single(1, false),
    }
}

/// Routing for the nested-dispatch commands, keyed on
/// `(command, subcommand)`, both lowercased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRoute {
    /// Fan out to every node with the given aggregation.
    AllNodes(Aggregate),
    /// Fan out to every primary with the given aggregation.
    AllPrimaries(Aggregate),
    /// Reject as a cluster orchestration command.
    Rejected,
    /// Send to an arbitrary primary.
    Sample,
}

/// Looks up the route for a `(command, subcommand)` pair.
pub fn subcommand_route(name: &str, sub: &str) -> SubRoute {
    use Aggregate::*;

    match (name, sub) {
        ("cluster", "saveconfig") => SubRoute::AllNodes(First),
        (
            "cluster",
            "addslots" | "addslotsrange" | "delslots" | "delslotsrange" | "failover"
            | "forget" | "meet" | "replicate" | "reset" | "set-config-epoch" | "setslot",
        ) => SubRoute::Rejected,

        ("client", "list") => SubRoute::AllNodes(Flatten),
        ("client", "pause" | "reply" | "setname") => SubRoute::AllNodes(First),

        ("config", "resetstat" | "rewrite" | "set") => SubRoute::AllNodes(First),

        ("memory", "stats") => SubRoute::AllNodes(PerNode),
        ("memory", "purge") => SubRoute::AllNodes(First),

        ("script", "debug" | "kill") => SubRoute::AllNodes(First),
        ("script", "flush" | "load") => SubRoute::AllPrimaries(First),

        ("pubsub", "channels") => SubRoute::AllNodes(ConcatUniqueSorted),
        ("pubsub", "numsub") => SubRoute::AllNodes(MergeCountMaps),
        ("pubsub", "numpat") => SubRoute::AllNodes(Sum),

        _ => SubRoute::Sample,
    }
}

/// Returns the slot-determining key of a command, if it has one.
pub fn extract_first_key(cmd: &Cmd) -> Option<Bytes> {
    let spec = command_spec(&cmd.name());
    if spec.first_key == 0 {
        return None;
    }
    cmd.arg_at(spec.first_key).cloned()
}

/// Combines fan-out replies under the given rule. Called only once every
/// branch has succeeded.
pub fn aggregate(rule: Aggregate, replies: Vec<Frame>) -> Result<Frame> {
    if replies.is_empty() {
        return Err(Error::Protocol {
            message: "fan-out produced no replies".to_string(),
        });
    }
    match rule {
        Aggregate::First => Ok(replies.into_iter().next().unwrap_or(Frame::Null)),
        Aggregate::Sum => {
            let mut total = 0i64;
            for reply in &replies {
                total += int_reply(reply)?;
            }
            Ok(Frame::Integer(total))
        }
        Aggregate::SortedInts => {
            let mut values = Vec::with_capacity(replies.len());
            for reply in &replies {
                values.push(int_reply(reply)?);
            }
            values.sort_unstable();
            Ok(Frame::Array(values.into_iter().map(Frame::Integer).collect()))
        }
        Aggregate::PerNode => Ok(Frame::Array(replies)),
        Aggregate::Flatten => {
            if replies.iter().all(|r| matches!(r, Frame::Array(_))) {
                let items = replies
                    .into_iter()
                    .flat_map(|r| r.into_array().unwrap_or_default())
                    .collect();
                Ok(Frame::Array(items))
            } else if replies.iter().all(|r| r.as_bulk().is_some()) {
                let mut text = Vec::new();
                for reply in &replies {
                    if let Some(chunk) = reply.as_bulk() {
                        text.extend_from_slice(chunk);
                    }
                }
                Ok(Frame::bulk(text))
            } else {
                Ok(Frame::Array(replies))
            }
        }
        Aggregate::ConcatSorted => {
            let mut items = flatten_elements(replies)?;
            sort_bulk(&mut items);
            Ok(Frame::Array(items))
        }
        Aggregate::ConcatUniqueSorted => {
            let mut items = flatten_elements(replies)?;
            sort_bulk(&mut items);
            items.dedup();
            Ok(Frame::Array(items))
        }
        Aggregate::MergeCountMaps => {
            let mut merged: BTreeMap<Vec<u8>, i64> = BTreeMap::new();
            for reply in replies {
                let pairs = reply.into_array().ok_or_else(|| Error::Protocol {
                    message: "expected an array of name/count pairs".to_string(),
                })?;
                let mut pairs = pairs.into_iter();
                while let (Some(name), Some(count)) = (pairs.next(), pairs.next()) {
                    let name = name.as_bulk().map(|b| b.to_vec()).unwrap_or_default();
                    *merged.entry(name).or_insert(0) += count.as_int().unwrap_or(0);
                }
            }
            let mut items = Vec::with_capacity(merged.len() * 2);
            for (name, count) in merged {
                items.push(Frame::bulk(name));
                items.push(Frame::Integer(count));
            }
            Ok(Frame::Array(items))
        }
    }
}

fn int_reply(reply: &Frame) -> Result<i64> {
    reply.as_int().ok_or_else(|| Error::Protocol {
        message: format!("expected an integer reply, got {reply:?}"),
    })
}

fn flatten_elements(replies: Vec<Frame>) -> Result<Vec<Frame>> {
    let mut items = Vec::new();
    for reply in replies {
        let elements = reply.into_array().ok_or_else(|| Error::Protocol {
            message: "expected an array reply".to_string(),
        })?;
        items.extend(elements);
    }
    Ok(items)
}

fn sort_bulk(items: &mut [Frame]) {
    items.sort_by(|a, b| {
        a.as_bulk()
            .map(|bytes| bytes.as_ref())
            .cmp(&b.as_bulk().map(|bytes| bytes.as_ref()))
    });
}
