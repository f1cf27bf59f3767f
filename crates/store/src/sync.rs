use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, TryStreamExt};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tessera_core::{ClusterConfig, ShardError, ShardResult, TopologySnapshot};
use tessera_registry::RegistryClient;
use tracing::{debug, warn};

/// How a sync reads the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Cluster list, then one identity fetch per cluster.
    #[default]
    PerCluster,
    /// One bulk call returning clusters with identities embedded.
    Bulk,
}

/// Registry sync bound to one manager identity.
#[derive(Clone)]
pub struct RegistrySync {
    registry: Arc<dyn RegistryClient>,
    identity: String,
    mode: SyncMode,
    concurrency: usize,
}

impl RegistrySync {
    pub fn new(registry: Arc<dyn RegistryClient>, identity: impl Into<String>) -> Self {
        Self { registry, identity: identity.into(), mode: SyncMode::PerCluster, concurrency: 8 }
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn mode(&self) -> SyncMode { self.mode }

    /// Produce a fresh snapshot. Never touches any cache.
    pub async fn sync(&self) -> ShardResult<TopologySnapshot> {
        let started = Instant::now();
        let res = match self.mode {
            SyncMode::PerCluster => sync_topology(self.registry.as_ref(), &self.identity, self.concurrency).await,
            SyncMode::Bulk => bulk_sync_topology(self.registry.as_ref(), &self.identity).await,
        };
        histogram!("tessera_registry_sync_ms", started.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &res {
            counter!("tessera_registry_sync_failed_total", 1u64, "kind" => e.kind());
        }
        res
    }
}

/// Cluster list, then identities per cluster (bounded concurrency, registry order kept).
///
/// A failed identity fetch fails the whole sync; a partial snapshot is never returned.
pub async fn sync_topology(registry: &dyn RegistryClient, identity: &str, concurrency: usize) -> ShardResult<TopologySnapshot> {
    let list = registry
        .get_clusters_by_identity(identity)
        .await
        .map_err(|e| ShardError::RegistryUnavailable(format!("cluster list for {}: {}", identity, e)))?;
    let clusters = normalize_clusters(list.clusters);
    debug!(identity, clusters = clusters.len(), "fetched cluster list");

    let clusters: Vec<ClusterConfig> = futures::stream::iter(clusters.into_iter().map(|mut cluster| async move {
        match registry.get_identities_by_cluster(&cluster.name).await {
            Ok(ids) => {
                cluster.identity_config = ids;
                Ok(attach_cluster_name(cluster))
            }
            Err(e) => {
                warn!(cluster = %cluster.name, error = %e, "identity fetch failed; discarding sync");
                Err(ShardError::PartialTopology { cluster: cluster.name, reason: e.to_string() })
            }
        }
    }))
    .buffered(concurrency.max(1))
    .try_collect()
    .await?;

    Ok(TopologySnapshot::new(clusters, list.resource_version, list.last_updated_time))
}

/// Single bulk call.
pub async fn bulk_sync_topology(registry: &dyn RegistryClient, identity: &str) -> ShardResult<TopologySnapshot> {
    let list = registry
        .bulk_sync(identity)
        .await
        .map_err(|e| ShardError::RegistryUnavailable(format!("bulk sync for {}: {}", identity, e)))?;
    let clusters = normalize_clusters(list.clusters).into_iter().map(attach_cluster_name).collect();
    Ok(TopologySnapshot::new(clusters, list.resource_version, list.last_updated_time))
}

/// Drop unnamed clusters and collapse duplicate names.
///
/// A duplicate keeps the position of its first occurrence and the value of its last.
pub fn normalize_clusters(clusters: Vec<ClusterConfig>) -> Vec<ClusterConfig> {
    let mut out: Vec<ClusterConfig> = Vec::with_capacity(clusters.len());
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    for cluster in clusters {
        if cluster.name.trim().is_empty() {
            warn!(locality = %cluster.locality, "registry returned a cluster without a name; skipping");
            counter!("tessera_registry_invalid_clusters_total", 1u64);
            continue;
        }
        match index.get(&cluster.name) {
            Some(&i) => {
                debug!(cluster = %cluster.name, "duplicate cluster in registry response; last entry wins");
                out[i] = cluster;
            }
            None => {
                index.insert(cluster.name.clone(), out.len());
                out.push(cluster);
            }
        }
    }
    out
}

fn attach_cluster_name(mut cluster: ClusterConfig) -> ClusterConfig {
    let ids = &mut cluster.identity_config;
    if ids.cluster_name.is_empty() {
        ids.cluster_name = cluster.name.clone();
    } else if ids.cluster_name != cluster.name {
        warn!(cluster = %cluster.name, reported = %ids.cluster_name, "identity config names another cluster; overriding");
        ids.cluster_name = cluster.name.clone();
    }
    cluster
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(name: &str, locality: &str) -> ClusterConfig {
        ClusterConfig { name: name.into(), locality: locality.into(), ..Default::default() }
    }

    #[test]
    fn normalize_keeps_first_position_last_value() {
        let out = normalize_clusters(vec![c("a", "1"), c("", "x"), c("b", "2"), c("a", "3")]);
        let got: Vec<_> = out.iter().map(|c| (c.name.as_str(), c.locality.as_str())).collect();
        assert_eq!(got, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn attach_overrides_foreign_cluster_name() {
        let mut cl = c("a", "1");
        cl.identity_config.cluster_name = "other".into();
        assert_eq!(attach_cluster_name(cl).identity_config.cluster_name, "a");
        assert_eq!(attach_cluster_name(c("b", "2")).identity_config.cluster_name, "b");
    }
}
