//! Replica selection strategies.
//!
//! For each shard the topology knows one primary and zero or more replicas;
//! the strategy decides which of them serves a read. All strategies fall back
//! to the primary when a shard has no usable replica.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::cluster::config::ReplicaAffinity;
use crate::cluster::node_key::NodeKey;

/// Picks the node serving reads for a shard.
#[derive(Debug, Clone)]
pub enum ReplicaStrategy {
    /// Uniform choice among replicas.
    Random,
    /// Uniform choice among replicas and the primary.
    RandomWithPrimary,
    /// Lowest measured round-trip time wins; unmeasured replicas fall back
    /// to a random choice.
    Latency {
        /// Round-trip times probed at topology build.
        rtts: HashMap<NodeKey, Duration>,
    },
}

impl ReplicaStrategy {
    /// Creates the strategy for a configured affinity. Latency measurements
    /// are supplied by the topology builder.
    pub fn new(affinity: ReplicaAffinity, rtts: HashMap<NodeKey, Duration>) -> Self {
        match affinity {
            ReplicaAffinity::Random => Self::Random,
            ReplicaAffinity::RandomWithPrimary => Self::RandomWithPrimary,
            ReplicaAffinity::Latency => Self::Latency { rtts },
        }
    }

    /// Chooses the node serving a read for a shard.
    pub fn pick(&self, primary: &NodeKey, replicas: &[NodeKey]) -> NodeKey {
        match self {
            Self::Random => pick_uniform(replicas).unwrap_or_else(|| primary.clone()),
            Self::RandomWithPrimary => {
                let mut pool: Vec<&NodeKey> = replicas.iter().collect();
                pool.push(primary);
                let index = rand::rng().random_range(0..pool.len());
                pool[index].clone()
            }
            Self::Latency { rtts } => {
                let measured = replicas
                    .iter()
                    .filter_map(|key| rtts.get(key).map(|rtt| (key, *rtt)))
                    .min_by_key(|(_, rtt)| *rtt);
                match measured {
                    Some((key, _)) => key.clone(),
                    None => pick_uniform(replicas).unwrap_or_else(|| primary.clone()),
                }
            }
        }
    }
}

fn pick_uniform(candidates: &[NodeKey]) -> Option<NodeKey> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..candidates.len());
    Some(candidates[index].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ports: &[u16]) -> Vec<NodeKey> {
        ports.iter().map(|p| NodeKey::new("h", *p)).collect()
    }

    #[test]
    fn random_falls_back_to_primary() {
        let strategy = ReplicaStrategy::new(ReplicaAffinity::Random, HashMap::new());
        let primary = NodeKey::new("h", 1);
        assert_eq!(strategy.pick(&primary, &[]), primary);
    }

    #[test]
    fn random_picks_from_replicas() {
        let strategy = ReplicaStrategy::new(ReplicaAffinity::Random, HashMap::new());
        let primary = NodeKey::new("h", 1);
        let replicas = keys(&[2, 3]);
        for _ in 0..20 {
            let picked = strategy.pick(&primary, &replicas);
            assert!(replicas.contains(&picked));
        }
    }

    #[test]
    fn random_with_primary_includes_primary() {
        let strategy = ReplicaStrategy::new(ReplicaAffinity::RandomWithPrimary, HashMap::new());
        let primary = NodeKey::new("h", 1);
        let replicas = keys(&[2]);
        let mut saw_primary = false;
        for _ in 0..200 {
            let picked = strategy.pick(&primary, &replicas);
            assert!(picked == primary || replicas.contains(&picked));
            saw_primary |= picked == primary;
        }
        assert!(saw_primary);
    }

    #[test]
    fn latency_prefers_fastest_measured() {
        let mut rtts = HashMap::new();
        rtts.insert(NodeKey::new("h", 2), Duration::from_millis(8));
        rtts.insert(NodeKey::new("h", 3), Duration::from_millis(2));
        let strategy = ReplicaStrategy::new(ReplicaAffinity::Latency, rtts);

        let primary = NodeKey::new("h", 1);
        let replicas = keys(&[2, 3]);
        assert_eq!(strategy.pick(&primary, &replicas), NodeKey::new("h", 3));
    }

    #[test]
    fn latency_unmeasured_falls_back() {
        let strategy = ReplicaStrategy::new(ReplicaAffinity::Latency, HashMap::new());
        let primary = NodeKey::new("h", 1);
        let replicas = keys(&[2, 3]);
        let picked = strategy.pick(&primary, &replicas);
        assert!(replicas.contains(&picked));

        assert_eq!(strategy.pick(&primary, &[]), primary);
    }
}
