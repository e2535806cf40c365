//! The cluster client facade.
//!
//! Classifies each command, dispatches it to one node or a node set, follows
//! MOVED/ASK redirects up to a bounded budget, and triggers topology
//! refreshes when the cluster view turns out to be stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::cluster::commands::{self, Aggregate, RoutingClass, SubRoute};
use crate::cluster::config::ClusterConfig;
use crate::cluster::node_key::NodeKey;
use crate::cluster::redirect::{self, Redirect};
use crate::cluster::scan::{self, ScanOptions, Scanner};
use crate::cluster::slot::slot_for;
use crate::cluster::topology::Topology;
use crate::error::{Error, Result};
use crate::node::command::{self, Cmd};
use crate::node::NodeClient;
use crate::resp::Frame;

/// Redirects followed per call before the error is surfaced. Bounded so a
/// resharding storm cannot trap a caller.
const DEFAULT_RETRY_BUDGET: u8 = 3;

enum Target {
    All,
    Primaries,
    ReadSet,
}

/// A Redis Cluster client.
///
/// Cheap to clone; clones share the topology, so a slot learned from a MOVED
/// reply on one clone immediately benefits the others.
///
/// # Example
///
/// ```no_run
/// use shardis::{Cmd, ClusterClient};
///
/// # async fn example() -> shardis::Result<()> {
/// let client = ClusterClient::connect("redis://127.0.0.1:7000").await?;
/// client.call(Cmd::new("SET").arg("foo").arg("1")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClusterClient {
    config: Arc<ClusterConfig>,
    topology: Arc<RwLock<Topology>>,
    refresh_lock: Arc<Mutex<()>>,
    generation: Arc<AtomicU64>,
}

impl ClusterClient {
    /// Connects using a comma-separated list of seed node URLs.
    pub async fn connect(addresses: &str) -> Result<Self> {
        let urls: Vec<String> = addresses
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let config = ClusterConfig::builder().nodes(urls).build()?;
        Self::with_config(config).await
    }

    /// Connects with a full [`ClusterConfig`].
    pub async fn with_config(config: ClusterConfig) -> Result<Self> {
        let topology = Topology::load(&config).await?;
        Ok(Self {
            config: Arc::new(config),
            topology: Arc::new(RwLock::new(topology)),
            refresh_lock: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Routes a command to the right node (or node set) and returns its
    /// reply, following up to three MOVED/ASK redirects.
    pub async fn call(&self, cmd: Cmd) -> Result<Frame> {
        self.dispatch(cmd, DEFAULT_RETRY_BUDGET, None).await
    }

    /// Like [`call`](Self::call) but one-shot: redirects are not followed,
    /// the first error surfaces unchanged.
    pub async fn call_once(&self, cmd: Cmd) -> Result<Frame> {
        self.dispatch(cmd, 0, None).await
    }

    /// Like [`call`](Self::call), applying `limit` to each node invocation.
    /// For blocking commands (`BLPOP`, `BRPOP`, ...).
    pub async fn blocking_call(&self, limit: Duration, cmd: Cmd) -> Result<Frame> {
        self.dispatch(cmd, DEFAULT_RETRY_BUDGET, Some(limit)).await
    }

    /// Starts a lazy cross-shard key iteration.
    pub fn scan(&self, options: ScanOptions) -> Scanner {
        Scanner::new(self.clone(), options)
    }

    /// `SSCAN` on the node owning `key`; single-node cursor semantics.
    pub async fn sscan(
        &self,
        key: impl Into<Bytes>,
        cursor: &str,
        options: &ScanOptions,
    ) -> Result<(String, Vec<Bytes>)> {
        self.key_scan("SSCAN", key, cursor, options).await
    }

    /// `HSCAN` on the node owning `key`; yields alternating fields and
    /// values.
    pub async fn hscan(
        &self,
        key: impl Into<Bytes>,
        cursor: &str,
        options: &ScanOptions,
    ) -> Result<(String, Vec<Bytes>)> {
        self.key_scan("HSCAN", key, cursor, options).await
    }

    /// `ZSCAN` on the node owning `key`; yields alternating members and
    /// scores.
    pub async fn zscan(
        &self,
        key: impl Into<Bytes>,
        cursor: &str,
        options: &ScanOptions,
    ) -> Result<(String, Vec<Bytes>)> {
        self.key_scan("ZSCAN", key, cursor, options).await
    }

    /// Closes every node connection. Safe to call more than once.
    pub async fn close(&self) {
        self.topology.read().await.close();
    }

    /// True when every known node answers PING.
    pub async fn is_connected(&self) -> bool {
        let clients = self.topology.read().await.all();
        for (_, client) in clients {
            match client.call(command::ping()).await {
                Ok(Frame::Error(_)) | Err(_) => return false,
                Ok(_) => {}
            }
        }
        true
    }

    /// An identifier for this client: every node key, sorted and joined.
    pub async fn id(&self) -> String {
        self.topology
            .read()
            .await
            .node_keys()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn dispatch(&self, cmd: Cmd, budget: u8, timeout: Option<Duration>) -> Result<Frame> {
        if cmd.is_empty() {
            return Err(Error::Protocol {
                message: "empty command".to_string(),
            });
        }
        let name = cmd.name();
        let spec = commands::command_spec(&name);

        match spec.routing {
            RoutingClass::Rejected => Err(Error::OrchestrationCommandNotSupported { command: name }),
            RoutingClass::Ambiguous => Err(Error::AmbiguousNode { command: name }),
            RoutingClass::AllNodes => self.fan_out(Target::All, cmd, spec.aggregate, timeout).await,
            RoutingClass::AllPrimaries => {
                self.fan_out(Target::Primaries, cmd, spec.aggregate, timeout).await
            }
            RoutingClass::AllReplicas => {
                self.fan_out(Target::ReadSet, cmd, spec.aggregate, timeout).await
            }
            RoutingClass::Scan => {
                let cursor = cmd
                    .arg_at(1)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_else(|| "0".to_string());
                let extra: Vec<Bytes> = (2..cmd.len()).filter_map(|i| cmd.arg_at(i).cloned()).collect();
                let (next, keys) = self.scan_step(&cursor, &extra).await?;
                Ok(Frame::Array(vec![
                    Frame::bulk(next),
                    Frame::Array(keys.into_iter().map(Frame::bulk).collect()),
                ]))
            }
            RoutingClass::Subcommand => {
                let sub = cmd.arg_lower(1).unwrap_or_default();
                match commands::subcommand_route(&name, &sub) {
                    SubRoute::Rejected => Err(Error::OrchestrationCommandNotSupported {
                        command: format!("{name} {sub}"),
                    }),
                    SubRoute::AllNodes(rule) => self.fan_out(Target::All, cmd, rule, timeout).await,
                    SubRoute::AllPrimaries(rule) => {
                        self.fan_out(Target::Primaries, cmd, rule, timeout).await
                    }
                    SubRoute::Sample => self.send_to_sample(cmd, timeout).await,
                }
            }
            RoutingClass::Single => match commands::extract_first_key(&cmd) {
                Some(key) if !key.is_empty() => {
                    let slot = slot_for(&key);
                    let need_primary = !spec.readonly || !self.config.replica();
                    self.try_send(slot, need_primary, cmd, budget, timeout).await
                }
                _ => self.send_to_sample(cmd, timeout).await,
            },
        }
    }

    /// The redirect-and-recovery loop for slot-routed commands.
    async fn try_send(
        &self,
        slot: u16,
        need_primary: bool,
        cmd: Cmd,
        mut budget: u8,
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        let (mut node_key, mut client) =
            { self.topology.read().await.route_for_slot(slot, need_primary)? };
        let mut asking = false;

        loop {
            if asking {
                // One-shot by protocol; its own failure surfaces through the
                // retried command below.
                let _ = self.send(&client, command::asking(), None).await;
            }
            let err = match self.send(&client, cmd.clone(), timeout).await {
                Ok(frame) => return Ok(frame),
                Err(err) => err,
            };

            if let Some((redirect, is_ask)) = Redirect::from_error(&err) {
                if budget == 0 {
                    return Err(err);
                }
                budget -= 1;
                tracing::debug!(
                    slot = redirect.slot,
                    target = %redirect.target,
                    ask = is_ask,
                    "following cluster redirect"
                );

                if !is_ask {
                    // MOVED is authoritative for the slot. An unknown target
                    // means our whole view is stale: rebuild, then record.
                    let updated = {
                        self.topology
                            .write()
                            .await
                            .update_slot(redirect.slot, redirect.target.clone())
                    };
                    if !updated {
                        self.refresh(Some(redirect.target.clone())).await;
                        self.topology
                            .write()
                            .await
                            .update_slot(redirect.slot, redirect.target.clone());
                    }
                }

                client = match self.lookup_or_refresh(&redirect.target).await {
                    Some(client) => client,
                    None => {
                        return Err(Error::NodeMightBeDown {
                            address: redirect.target.to_string(),
                        })
                    }
                };
                node_key = redirect.target;
                asking = is_ask;
            } else if err.is_connection_error() {
                self.refresh(None).await;
                return Err(self.reclassify_connection_error(&node_key, err).await);
            } else {
                return Err(err);
            }
        }
    }

    async fn lookup_or_refresh(&self, key: &NodeKey) -> Option<Arc<NodeClient>> {
        if let Some(client) = self.topology.read().await.find_by(key) {
            return Some(client);
        }
        self.refresh(Some(key.clone())).await;
        self.topology.read().await.find_by(key)
    }

    async fn send_to_sample(&self, cmd: Cmd, timeout: Option<Duration>) -> Result<Frame> {
        let (node_key, client) = { self.topology.read().await.sample()? };
        match self.send(&client, cmd, timeout).await {
            Err(err) if err.is_connection_error() => {
                self.refresh(None).await;
                Err(self.reclassify_connection_error(&node_key, err).await)
            }
            other => other,
        }
    }

    async fn send(
        &self,
        client: &NodeClient,
        cmd: Cmd,
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        let reply = match timeout {
            Some(limit) => client.call_with_timeout(limit, cmd).await?,
            None => client.call(cmd).await?,
        };
        redirect::reply_to_result(reply)
    }

    /// Fans a command out to a node set with bounded concurrency. The first
    /// error (in node-key order) is raised only after every branch has been
    /// attempted; siblings are never cancelled early.
    async fn fan_out(
        &self,
        target: Target,
        cmd: Cmd,
        rule: Aggregate,
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        let clients = {
            let topology = self.topology.read().await;
            match target {
                Target::All => topology.all(),
                Target::Primaries => topology.primaries(),
                Target::ReadSet => topology.read_set(),
            }
        };

        let pool = Arc::new(Semaphore::new(self.config.max_concurrency()));
        let mut handles = Vec::with_capacity(clients.len());
        for (_, client) in clients {
            let pool = Arc::clone(&pool);
            let cmd = cmd.clone();
            handles.push(tokio::spawn(async move {
                let _permit = pool.acquire_owned().await.map_err(|_| Error::Protocol {
                    message: "fan-out pool closed".to_string(),
                })?;
                let reply = match timeout {
                    Some(limit) => client.call_with_timeout(limit, cmd).await?,
                    None => client.call(cmd).await?,
                };
                redirect::reply_to_result(reply)
            }));
        }

        let mut replies = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(frame)) => replies.push(frame),
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Protocol {
                            message: "fan-out task failed".to_string(),
                        });
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => commands::aggregate(rule, replies),
        }
    }

    /// One iteration of the cross-shard scan: decode the global cursor, run
    /// SCAN on the indexed shard, advance to the next shard when that
    /// shard's cursor wraps to zero.
    pub(crate) async fn scan_step(
        &self,
        cursor: &str,
        extra_args: &[Bytes],
    ) -> Result<(String, Vec<Bytes>)> {
        let (node_cursor, mut index) = scan::decode_cursor(cursor)?;
        let clients = {
            let mut clients = self.topology.read().await.clients_for_scanning();
            clients.truncate(scan::MAX_SCAN_CLIENTS);
            clients
        };
        if index >= clients.len() {
            return Ok(("0".to_string(), Vec::new()));
        }

        let (node_key, client) = clients[index].clone();
        let mut cmd = Cmd::new("SCAN").arg(node_cursor.to_string());
        for arg in extra_args {
            cmd = cmd.arg(arg.clone());
        }
        let reply = match self.send(&client, cmd, None).await {
            Ok(frame) => frame,
            Err(err) if err.is_connection_error() => {
                self.refresh(None).await;
                return Err(self.reclassify_connection_error(&node_key, err).await);
            }
            Err(err) => return Err(err),
        };

        let (next_node_cursor, keys) = scan::parse_scan_reply(reply)?;
        let next = if next_node_cursor == 0 {
            index += 1;
            if index >= clients.len() {
                "0".to_string()
            } else {
                scan::encode_cursor(0, index)
            }
        } else {
            scan::encode_cursor(next_node_cursor, index)
        };
        Ok((next, keys))
    }

    async fn key_scan(
        &self,
        verb: &'static str,
        key: impl Into<Bytes>,
        cursor: &str,
        options: &ScanOptions,
    ) -> Result<(String, Vec<Bytes>)> {
        let mut cmd = Cmd::new(verb).arg(key).arg(cursor.to_string());
        for arg in options.to_args() {
            cmd = cmd.arg(arg);
        }
        let reply = self.dispatch(cmd, DEFAULT_RETRY_BUDGET, None).await?;
        let (next_cursor, elements) = scan::parse_scan_reply(reply)?;
        Ok((next_cursor.to_string(), elements))
    }

    /// Rebuilds the topology from the current seed list and swaps it in
    /// atomically. Failures are logged; the caller re-raises its own error.
    ///
    /// Refreshes are serialized: a caller that queued behind a completed
    /// refresh skips its own reload, since that refresh already read the
    /// latest seeds.
    pub(crate) async fn refresh(&self, hint: Option<NodeKey>) {
        if let Some(key) = &hint {
            self.config.add_node(self.config.endpoint_from_key(key));
        }
        let requested = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != requested {
            return;
        }

        match Topology::load(&self.config).await {
            Ok(new_topology) => {
                let nodes = new_topology.node_keys().len();
                let old = {
                    let mut guard = self.topology.write().await;
                    std::mem::replace(&mut *guard, new_topology)
                };
                old.close();
                self.generation.fetch_add(1, Ordering::Release);
                tracing::info!(nodes, "cluster topology refreshed");
            }
            Err(err) => {
                tracing::warn!(error = %err, "topology refresh failed");
            }
        }
    }

    async fn reclassify_connection_error(&self, key: &NodeKey, err: Error) -> Error {
        if self.topology.read().await.find_by(key).is_none() {
            Error::NodeMightBeDown {
                address: key.to_string(),
            }
        } else {
            err
        }
    }
}
