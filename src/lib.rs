//! # Shardis
//!
//! Redis Cluster client for Rust. Accepts arbitrary Redis commands, routes
//! each to the node owning the key's hash slot, and keeps a live view of the
//! cluster topology while transparently following MOVED/ASK redirects.
//!
//! ## Features
//!
//! - **Slot-aware routing**: CRC16/XMODEM key slotting with hash-tag support
//! - **Topology discovery**: `CLUSTER NODES` parsing with replica awareness
//! - **Redirect handling**: bounded MOVED/ASK retry loop with slot-map repair
//! - **Replica reads**: pluggable replica selection (random, random-with-primary,
//!   latency-based)
//! - **Fan-out commands**: `KEYS`, `DBSIZE`, `FLUSHALL`, ... dispatched to the
//!   right node set with deterministic aggregation
//! - **Cross-shard SCAN**: one stable cursor over every shard
//! - `tls` - TLS support for `rediss://` endpoints
//!
//! ## Example
//!
//! ```no_run
//! use shardis::{Cmd, ClusterClient};
//!
//! #[tokio::main]
//! async fn main() -> shardis::Result<()> {
//!     let client = ClusterClient::connect("redis://127.0.0.1:7000,redis://127.0.0.1:7001").await?;
//!
//!     client.call(Cmd::new("SET").arg("foo").arg("1")).await?;
//!     let value = client.call(Cmd::new("GET").arg("foo")).await?;
//!     println!("{:?}", value);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod error;
pub mod node;
pub mod resp;

pub use crate::cluster::config::{ClusterConfig, ClusterConfigBuilder, Endpoint, ReplicaAffinity};
pub use crate::cluster::node_key::NodeKey;
pub use crate::cluster::router::ClusterClient;
pub use crate::cluster::scan::{ScanOptions, Scanner};
pub use crate::cluster::slot::slot_for;
pub use crate::error::{Error, Result};
pub use crate::node::command::Cmd;
pub use crate::node::NodeOptions;
pub use crate::resp::Frame;
