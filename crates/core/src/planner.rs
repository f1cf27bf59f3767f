//! Shard planners: map a topology snapshot onto shard assignments.

use serde::{Deserialize, Serialize};

use crate::{ShardingManagerParams, TopologySnapshot};

/// One shard to publish: its key, the operator it targets and its clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    pub shard_key: String,
    pub operator_identity: String,
    pub topology: TopologySnapshot,
}

/// Decides which clusters belong to which shard.
/// Implementations must be deterministic for a given snapshot.
pub trait ShardPlanner: Send + Sync {
    fn plan(&self, topology: &TopologySnapshot, params: &ShardingManagerParams) -> Vec<ShardAssignment>;
}

/// Default planner: one shard mirroring the whole topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleShardPlanner {
    shard_key: String,
}

impl SingleShardPlanner {
    pub fn new(shard_key: impl Into<String>) -> Self { Self { shard_key: shard_key.into() } }
}

impl Default for SingleShardPlanner {
    fn default() -> Self { Self::new("0") }
}

impl ShardPlanner for SingleShardPlanner {
    fn plan(&self, topology: &TopologySnapshot, params: &ShardingManagerParams) -> Vec<ShardAssignment> {
        vec![ShardAssignment {
            shard_key: self.shard_key.clone(),
            operator_identity: params.operator_identity.clone(),
            topology: topology.clone(),
        }]
    }
}

/// Modulo bucketing of clusters by FNV-1a hash of the cluster name.
///
/// Shard `i` of `n` gets key `"{i}-{n}"` and targets operator `"{operator}-{i}"`.
/// Every bucket is published, including empty ones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModuloClusterPlanner { buckets: u16 }

impl ModuloClusterPlanner {
    pub fn new(buckets: usize) -> Self {
        Self { buckets: buckets.max(1).min(u16::MAX as usize) as u16 }
    }

    pub fn buckets(&self) -> u16 { self.buckets }

    pub fn bucket_of(&self, cluster_name: &str) -> u16 {
        if self.buckets <= 1 { 0 } else { (fnv1a(cluster_name) % self.buckets as u64) as u16 }
    }
}

impl ShardPlanner for ModuloClusterPlanner {
    fn plan(&self, topology: &TopologySnapshot, params: &ShardingManagerParams) -> Vec<ShardAssignment> {
        (0..self.buckets)
            .map(|i| ShardAssignment {
                shard_key: format!("{}-{}", i, self.buckets),
                operator_identity: format!("{}-{}", params.operator_identity, i),
                topology: topology.subset(|c| self.bucket_of(&c.name) == i),
            })
            .collect()
    }
}

/// 64-bit FNV-1a.
pub fn fnv1a(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}
