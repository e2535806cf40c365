//! The live cluster view: one client per node, the slot map, and the
//! replica map.
//!
//! A `Topology` is immutable apart from single-slot repairs after MOVED; a
//! refresh builds a whole new `Topology` and swaps it in, so in-flight
//! operations finish against the snapshot they started with.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::cluster::config::{ClusterConfig, ReplicaAffinity};
use crate::cluster::node_key::NodeKey;
use crate::cluster::nodes::{self, NodeRecord, Role};
use crate::cluster::redirect;
use crate::cluster::slot::SLOT_COUNT;
use crate::cluster::strategy::ReplicaStrategy;
use crate::error::{Error, Result};
use crate::node::{command, NodeClient};

const LATENCY_PROBES: u32 = 3;

/// The cluster as currently known: connected clients, slot ownership, and
/// replica placement.
pub struct Topology {
    clients: HashMap<NodeKey, Arc<NodeClient>>,
    slots: Vec<Option<NodeKey>>,
    replicas: HashMap<NodeKey, Vec<NodeKey>>,
    strategy: ReplicaStrategy,
    replica_reads: bool,
    closed: AtomicBool,
}

impl Topology {
    /// Discovers the cluster from the configured seeds.
    ///
    /// Seeds are tried in order under the slow-command timeout; the first one
    /// that yields a parseable `CLUSTER NODES` wins. When none does, the
    /// per-seed failures are aggregated into an `InitialSetup` error.
    pub(crate) async fn load(config: &ClusterConfig) -> Result<Topology> {
        let seeds = config.startup_nodes();
        let mut failures = Vec::with_capacity(seeds.len());
        for seed in &seeds {
            match Self::from_seed(seed, config).await {
                Ok(topology) => return Ok(topology),
                Err(err) => {
                    tracing::warn!(seed = %seed.node_key(), error = %err, "seed discovery failed");
                    failures.push(format!("{}: {}", seed.node_key(), err));
                }
            }
        }
        Err(Error::InitialSetup { errors: failures })
    }

    async fn from_seed(
        seed: &crate::cluster::config::Endpoint,
        config: &ClusterConfig,
    ) -> Result<Topology> {
        let probe = NodeClient::connect(&seed.host, seed.port, &config.options_for(seed)).await?;
        let reply = match config.slow_command_timeout() {
            Some(limit) => probe.call_with_timeout(limit, command::cluster_nodes()).await,
            None => probe.call(command::cluster_nodes()).await,
        };
        probe.close();

        let reply = redirect::reply_to_result(reply?)?;
        let text = reply.as_text().ok_or_else(|| Error::Protocol {
            message: "CLUSTER NODES did not reply with text".to_string(),
        })?;
        let mut records = nodes::parse_cluster_nodes(&text)?;

        if let Some(hostname) = config.fixed_hostname() {
            for record in &mut records {
                record.key = record.key.with_host(hostname);
            }
        }

        let topology = Self::build(&records, config).await?;
        config.replace_nodes(
            topology
                .node_keys()
                .iter()
                .map(|key| config.endpoint_from_key(key))
                .collect(),
        );
        Ok(topology)
    }

    async fn build(records: &[NodeRecord], config: &ClusterConfig) -> Result<Topology> {
        let (slots, mut replicas) = build_maps(records);

        let mut clients: HashMap<NodeKey, Arc<NodeClient>> = HashMap::new();
        for record in records {
            if clients.contains_key(&record.key) {
                continue;
            }
            if record.role == Role::Replica && !record.available {
                continue;
            }
            let options = config.options_for(&config.endpoint_from_key(&record.key));
            match NodeClient::connect(record.key.host(), record.key.port(), &options).await {
                Ok(client) => {
                    clients.insert(record.key.clone(), Arc::new(client));
                }
                Err(err) if record.role == Role::Replica => {
                    tracing::warn!(node = %record.key, error = %err, "replica unreachable, skipping");
                }
                Err(err) => return Err(err),
            }
        }

        // Every key left in the replica map must have a client entry.
        for list in replicas.values_mut() {
            list.retain(|key| clients.contains_key(key));
        }

        let rtts = if config.replica_affinity() == ReplicaAffinity::Latency {
            probe_rtts(&clients, replicas.values().flatten()).await
        } else {
            HashMap::new()
        };

        Ok(Topology {
            clients,
            slots,
            replicas,
            strategy: ReplicaStrategy::new(config.replica_affinity(), rtts),
            replica_reads: config.replica(),
            closed: AtomicBool::new(false),
        })
    }

    /// The client and identity serving `slot`. Writes and non-read-only
    /// commands need the primary; reads may go to a replica per strategy.
    pub(crate) fn route_for_slot(
        &self,
        slot: u16,
        need_primary: bool,
    ) -> Result<(NodeKey, Arc<NodeClient>)> {
        let primary = self
            .slots
            .get(slot as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Protocol {
                message: format!("slot {slot} is not served by any known node"),
            })?;
        let key = if need_primary || !self.replica_reads {
            primary.clone()
        } else {
            let shard_replicas = self
                .replicas
                .get(primary)
                .map(Vec::as_slice)
                .unwrap_or_default();
            self.strategy.pick(primary, shard_replicas)
        };
        match self.clients.get(&key) {
            Some(client) => Ok((key, Arc::clone(client))),
            // The strategy can only return mapped keys, but fall back to the
            // primary rather than failing the call.
            None => self
                .clients
                .get(primary)
                .map(|client| (primary.clone(), Arc::clone(client)))
                .ok_or_else(|| Error::Protocol {
                    message: format!("no client for node {primary}"),
                }),
        }
    }

    /// Every primary, in node-key order.
    pub(crate) fn primaries(&self) -> Vec<(NodeKey, Arc<NodeClient>)> {
        let mut keys: Vec<&NodeKey> = self.replicas.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| self.clients.get(key).map(|c| (key.clone(), Arc::clone(c))))
            .collect()
    }

    /// Every connected node, in node-key order.
    pub(crate) fn all(&self) -> Vec<(NodeKey, Arc<NodeClient>)> {
        let mut entries: Vec<(NodeKey, Arc<NodeClient>)> = self
            .clients
            .iter()
            .map(|(key, client)| (key.clone(), Arc::clone(client)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// One read-serving client per shard: the strategy's replica choice when
    /// replica reads are on, the primary otherwise. Also the scan set.
    pub(crate) fn read_set(&self) -> Vec<(NodeKey, Arc<NodeClient>)> {
        let mut primaries: Vec<&NodeKey> = self.replicas.keys().collect();
        primaries.sort();
        primaries
            .into_iter()
            .filter_map(|primary| {
                let key = if self.replica_reads {
                    let shard_replicas = self
                        .replicas
                        .get(primary)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    self.strategy.pick(primary, shard_replicas)
                } else {
                    primary.clone()
                };
                let client = self.clients.get(&key).or_else(|| self.clients.get(primary))?;
                Some((key, Arc::clone(client)))
            })
            .collect()
    }

    /// One client per shard for cross-shard scanning, in stable shard order.
    pub(crate) fn clients_for_scanning(&self) -> Vec<(NodeKey, Arc<NodeClient>)> {
        self.read_set()
    }

    /// Repoints `slot` at `key` after a MOVED reply. Returns false when the
    /// advertised node is unknown to this topology, in which case the caller
    /// must do a full refresh.
    pub(crate) fn update_slot(&mut self, slot: u16, key: NodeKey) -> bool {
        if !self.clients.contains_key(&key) {
            return false;
        }
        if let Some(entry) = self.slots.get_mut(slot as usize) {
            *entry = Some(key);
        }
        true
    }

    /// The client for a specific node, if the topology knows it.
    pub(crate) fn find_by(&self, key: &NodeKey) -> Option<Arc<NodeClient>> {
        self.clients.get(key).map(Arc::clone)
    }

    /// An arbitrary primary, for commands that carry no key.
    pub(crate) fn sample(&self) -> Result<(NodeKey, Arc<NodeClient>)> {
        let primaries = self.primaries();
        if primaries.is_empty() {
            return Err(Error::Protocol {
                message: "topology has no primaries".to_string(),
            });
        }
        let index = rand::rng().random_range(0..primaries.len());
        Ok(primaries[index].clone())
    }

    /// Every known node key, sorted.
    pub(crate) fn node_keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.clients.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Closes every client exactly once. Safe to call repeatedly.
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            for client in self.clients.values() {
                client.close();
            }
        }
    }
}

#[cfg(test)]
impl Topology {
    /// A connected-to-nothing topology for exercising routing logic.
    pub(crate) fn empty_for_tests() -> Self {
        Self {
            clients: HashMap::new(),
            slots: vec![None; SLOT_COUNT as usize],
            replicas: HashMap::new(),
            strategy: ReplicaStrategy::Random,
            replica_reads: false,
            closed: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("nodes", &self.clients.len())
            .field("shards", &self.replicas.len())
            .field("replica_reads", &self.replica_reads)
            .finish()
    }
}

/// Derives the slot map and replica map from parsed node records.
fn build_maps(
    records: &[NodeRecord],
) -> (Vec<Option<NodeKey>>, HashMap<NodeKey, Vec<NodeKey>>) {
    let mut slots: Vec<Option<NodeKey>> = vec![None; SLOT_COUNT as usize];
    let mut replicas: HashMap<NodeKey, Vec<NodeKey>> = HashMap::new();
    let mut primary_by_id: HashMap<&str, &NodeKey> = HashMap::new();

    for record in records.iter().filter(|r| r.is_primary()) {
        primary_by_id.insert(record.id.as_str(), &record.key);
        replicas.entry(record.key.clone()).or_default();
        for (start, end) in &record.slots {
            for slot in *start..=*end {
                if let Some(entry) = slots.get_mut(slot as usize) {
                    *entry = Some(record.key.clone());
                }
            }
        }
    }

    for record in records.iter().filter(|r| r.role == Role::Replica && r.available) {
        let primary_key = record
            .primary_id
            .as_deref()
            .and_then(|id| primary_by_id.get(id));
        if let Some(primary_key) = primary_key {
            replicas
                .entry((*primary_key).clone())
                .or_default()
                .push(record.key.clone());
        }
    }

    (slots, replicas)
}

async fn probe_rtts<'a>(
    clients: &HashMap<NodeKey, Arc<NodeClient>>,
    keys: impl Iterator<Item = &'a NodeKey>,
) -> HashMap<NodeKey, Duration> {
    let mut rtts = HashMap::new();
    for key in keys {
        let Some(client) = clients.get(key) else {
            continue;
        };
        let mut best: Option<Duration> = None;
        for _ in 0..LATENCY_PROBES {
            let started = Instant::now();
            if client.call(command::ping()).await.is_err() {
                best = None;
                break;
            }
            let elapsed = started.elapsed();
            best = Some(best.map_or(elapsed, |b| b.min(elapsed)));
        }
        if let Some(rtt) = best {
            rtts.insert(key.clone(), rtt);
        }
    }
    rtts
}
