//! Tessera core types: registry topology, manager parameters and error kinds.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod planner;
mod trigger;

pub use planner::{fnv1a, ModuloClusterPlanner, ShardAssignment, ShardPlanner, SingleShardPlanner};
pub use trigger::{Trigger, TriggerSource};

/// Label carrying the sharding manager identity (owner) on every Shard.
pub const DEFAULT_SHARD_IDENTITY_LABEL: &str = "admiral.io/shardIdentity";
/// Label consuming operators filter on.
pub const DEFAULT_OPERATOR_IDENTITY_LABEL: &str = "admiral.io/operatorIdentity";
/// Annotation recording the registry resourceVersion a shard was built from.
pub const TOPOLOGY_VERSION_ANNOTATION: &str = "admiral.io/topology-version";

/// One workload identity (asset) active in a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetEntry {
    #[serde(rename = "asset", default)]
    pub name: String,
    #[serde(default)]
    pub environment: String,
    #[serde(rename = "sourceAsset", default)]
    pub is_source_asset: bool,
    #[serde(rename = "destinationAsset", default)]
    pub is_destination_asset: bool,
}

/// Identities registered for a single cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityConfig {
    #[serde(rename = "clustername", default)]
    pub cluster_name: String,
    #[serde(rename = "assetList", default)]
    pub assets: Vec<AssetEntry>,
}

/// A Kubernetes cluster known to the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub locality: String,
    #[serde(rename = "assets", default)]
    pub identity_config: IdentityConfig,
}

/// Cluster list as served by the registry for a manager identity.
/// The bulk endpoint returns the same shape with `assets` filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterList {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    #[serde(rename = "lastUpdatedTime", default, skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<String>,
    #[serde(rename = "resourceVersion", default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// Immutable view of the registry topology produced by one sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub clusters: Vec<ClusterConfig>,
    /// Unix seconds when the sync completed.
    pub fetched_at: i64,
    pub resource_version: Option<String>,
    pub last_updated_time: Option<String>,
}

impl TopologySnapshot {
    pub fn new(clusters: Vec<ClusterConfig>, resource_version: Option<String>, last_updated_time: Option<String>) -> Self {
        Self { clusters, fetched_at: chrono::Utc::now().timestamp(), resource_version, last_updated_time }
    }

    pub fn is_empty(&self) -> bool { self.clusters.is_empty() }

    pub fn cluster(&self, name: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.clusters.iter().map(|c| c.name.as_str())
    }

    pub fn identity_count(&self) -> usize {
        self.clusters.iter().map(|c| c.identity_config.assets.len()).sum()
    }

    /// Same metadata, only the clusters accepted by `keep` (order preserved).
    pub fn subset<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&ClusterConfig) -> bool,
    {
        Self {
            clusters: self.clusters.iter().filter(|c| keep(c)).cloned().collect(),
            fetched_at: self.fetched_at,
            resource_version: self.resource_version.clone(),
            last_updated_time: self.last_updated_time.clone(),
        }
    }
}

/// Static configuration, fixed at process start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardingManagerParams {
    /// Manager identity: registry lookup key and owner label value.
    pub identity: String,
    /// Value written under `operator_identity_label`.
    pub operator_identity: String,
    pub operator_identity_label: String,
    pub shard_identity_label: String,
    pub namespace: String,
    pub registry_endpoint: String,
    pub kubeconfig_path: Option<PathBuf>,
}

impl ShardingManagerParams {
    pub fn new(identity: impl Into<String>, operator_identity: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            operator_identity: operator_identity.into(),
            operator_identity_label: DEFAULT_OPERATOR_IDENTITY_LABEL.to_string(),
            shard_identity_label: DEFAULT_SHARD_IDENTITY_LABEL.to_string(),
            namespace: namespace.into(),
            registry_endpoint: String::new(),
            kubeconfig_path: None,
        }
    }

    pub fn with_labels(mut self, shard_identity_label: impl Into<String>, operator_identity_label: impl Into<String>) -> Self {
        self.shard_identity_label = shard_identity_label.into();
        self.operator_identity_label = operator_identity_label.into();
        self
    }

    pub fn with_registry_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.registry_endpoint = endpoint.into();
        self
    }

    pub fn with_kubeconfig(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig_path = path;
        self
    }

    /// Label selector matching every Shard owned by this manager.
    pub fn owner_selector(&self) -> String {
        format!("{}={}", self.shard_identity_label, self.identity)
    }

    /// Startup check; a failure here is fatal to process start.
    pub fn validate(&self) -> ShardResult<()> {
        let required = [
            ("identity", &self.identity),
            ("operator identity label", &self.operator_identity_label),
            ("shard identity label", &self.shard_identity_label),
            ("namespace", &self.namespace),
        ];
        for (what, value) in required {
            if value.trim().is_empty() {
                return Err(ShardError::InvalidShardSpec(format!("{} must not be empty", what)));
            }
        }
        if self.shard_identity_label == self.operator_identity_label {
            return Err(ShardError::InvalidShardSpec("owner and operator label keys must differ".into()));
        }
        Ok(())
    }
}

/// Failure kinds of a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("partial topology: identity fetch for cluster {cluster} failed: {reason}")]
    PartialTopology { cluster: String, reason: String },
    #[error("invalid shard spec: {0}")]
    InvalidShardSpec(String),
    #[error("resource conflict on shard {0}: resourceVersion still stale after retry")]
    ResourceConflict(String),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("reconciliation pass exceeded its {0:?} budget")]
    PassTimeout(Duration),
    #[error("reconciliation pass cancelled")]
    Cancelled,
}

impl ShardError {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ShardError::RegistryUnavailable(_) => "registry_unavailable",
            ShardError::PartialTopology { .. } => "partial_topology",
            ShardError::InvalidShardSpec(_) => "invalid_shard_spec",
            ShardError::ResourceConflict(_) => "resource_conflict",
            ShardError::ResourceUnavailable(_) => "resource_unavailable",
            ShardError::PassTimeout(_) => "pass_timeout",
            ShardError::Cancelled => "cancelled",
        }
    }

    /// Whether the next timer tick may succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ShardError::InvalidShardSpec(_) | ShardError::Cancelled)
    }
}

pub type ShardResult<T> = Result<T, ShardError>;

pub mod prelude {
    pub use super::{
        AssetEntry, ClusterConfig, ClusterList, IdentityConfig, ShardError, ShardResult, ShardingManagerParams,
        TopologySnapshot, Trigger, TriggerSource,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_list_reads_registry_wire_format() {
        let raw = r#"{
            "clusters": [
                {"name": "cluster1", "locality": "us-west-2", "metadata": {},
                 "assets": {"clustername": "cluster1", "assetList": [
                    {"asset": "identity1", "environment": "prod", "sourceAsset": true}
                 ]}},
                {"name": "cluster2", "locality": "us-east-2"}
            ],
            "lastUpdatedTime": "2024-06-20T18:25:43.511Z",
            "resourceVersion": "1.2.3"
        }"#;
        let list: ClusterList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.clusters.len(), 2);
        assert_eq!(list.resource_version.as_deref(), Some("1.2.3"));
        let a = &list.clusters[0].identity_config.assets[0];
        assert_eq!(a.name, "identity1");
        assert!(a.is_source_asset);
        assert!(!a.is_destination_asset);
        assert!(list.clusters[1].identity_config.assets.is_empty());
    }

    #[test]
    fn subset_keeps_order_and_metadata() {
        let snap = TopologySnapshot {
            clusters: ["a", "b", "c"].iter().map(|n| ClusterConfig { name: n.to_string(), ..Default::default() }).collect(),
            fetched_at: 42,
            resource_version: Some("7".into()),
            last_updated_time: None,
        };
        let sub = snap.subset(|c| c.name != "b");
        assert_eq!(sub.cluster_names().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(sub.fetched_at, 42);
        assert_eq!(sub.resource_version.as_deref(), Some("7"));
    }

    #[test]
    fn params_validation() {
        let ok = ShardingManagerParams::new("mgr1", "op", "shard-ns");
        assert!(ok.validate().is_ok());
        assert_eq!(ok.owner_selector(), "admiral.io/shardIdentity=mgr1");

        let empty_ns = ShardingManagerParams::new("mgr1", "op", "");
        assert!(matches!(empty_ns.validate(), Err(ShardError::InvalidShardSpec(_))));

        let same_labels = ShardingManagerParams::new("mgr1", "op", "ns").with_labels("x", "x");
        assert!(same_labels.validate().is_err());
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(ShardError::RegistryUnavailable("x".into()).kind(), "registry_unavailable");
        assert_eq!(ShardError::PartialTopology { cluster: "c".into(), reason: "r".into() }.kind(), "partial_topology");
        assert!(!ShardError::InvalidShardSpec("x".into()).is_retryable());
        assert!(ShardError::ResourceConflict("s".into()).is_retryable());
    }
}
