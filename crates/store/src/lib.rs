//! Tessera store: topology cache with atomic snapshot swaps, and registry sync.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use metrics::gauge;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tessera_core::TopologySnapshot;
use tracing::{debug, info};

mod sync;

pub use sync::{bulk_sync_topology, normalize_clusters, sync_topology, RegistrySync, SyncMode};

/// What the cache holds at one epoch. Replaced as a whole, never edited.
#[derive(Debug, Default)]
pub struct CacheState {
    pub epoch: u64,
    pub current: Option<Arc<TopologySnapshot>>,
    pub previous: Option<Arc<TopologySnapshot>>,
}

/// Cluster-level differences between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl TopologyDiff {
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty() }
}

/// Diff by cluster name. Names follow the order of the snapshot they come from.
pub fn diff_topology(prev: Option<&TopologySnapshot>, next: &TopologySnapshot) -> TopologyDiff {
    let Some(prev) = prev else {
        return TopologyDiff { added: next.cluster_names().map(str::to_string).collect(), ..Default::default() };
    };
    let before: FxHashMap<&str, _> = prev.clusters.iter().map(|c| (c.name.as_str(), c)).collect();
    let after: FxHashMap<&str, _> = next.clusters.iter().map(|c| (c.name.as_str(), c)).collect();
    let mut diff = TopologyDiff::default();
    for c in next.clusters.iter() {
        match before.get(c.name.as_str()) {
            None => diff.added.push(c.name.clone()),
            Some(old) if *old != c => diff.changed.push(c.name.clone()),
            Some(_) => {}
        }
    }
    for c in prev.clusters.iter() {
        if !after.contains_key(c.name.as_str()) {
            diff.removed.push(c.name.clone());
        }
    }
    diff
}

/// Current + previous topology, swapped atomically after each successful sync.
pub struct TopologyCache {
    state: ArcSwap<CacheState>,
}

impl Default for TopologyCache {
    fn default() -> Self { Self::new() }
}

impl TopologyCache {
    pub fn new() -> Self {
        Self { state: ArcSwap::from_pointee(CacheState::default()) }
    }

    pub fn load(&self) -> Arc<CacheState> { self.state.load_full() }
    pub fn current(&self) -> Option<Arc<TopologySnapshot>> { self.state.load().current.clone() }
    pub fn previous(&self) -> Option<Arc<TopologySnapshot>> { self.state.load().previous.clone() }
    pub fn epoch(&self) -> u64 { self.state.load().epoch }

    /// Install `next` as current; the old current becomes previous.
    pub fn replace(&self, next: TopologySnapshot) -> (Arc<TopologySnapshot>, TopologyDiff) {
        let next = Arc::new(next);
        let old = self.state.rcu(|s| CacheState {
            epoch: s.epoch.saturating_add(1),
            current: Some(Arc::clone(&next)),
            previous: s.current.clone(),
        });
        let diff = diff_topology(old.current.as_deref(), &next);
        let epoch = old.epoch.saturating_add(1);
        gauge!("tessera_topology_clusters", next.clusters.len() as f64);
        if diff.is_empty() {
            debug!(epoch, clusters = next.clusters.len(), "topology unchanged");
        } else {
            info!(epoch, added = ?diff.added, removed = ?diff.removed, changed = ?diff.changed, "topology changed");
        }
        (next, diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ClusterConfig;

    fn snap(clusters: &[(&str, &str)]) -> TopologySnapshot {
        TopologySnapshot {
            clusters: clusters
                .iter()
                .map(|(n, l)| ClusterConfig { name: n.to_string(), locality: l.to_string(), ..Default::default() })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn replace_rotates_current_into_previous() {
        let cache = TopologyCache::new();
        assert!(cache.current().is_none());
        assert_eq!(cache.epoch(), 0);

        let (_, d1) = cache.replace(snap(&[("c1", "us-west-2")]));
        assert_eq!(d1.added, vec!["c1"]);
        assert_eq!(cache.epoch(), 1);
        assert!(cache.previous().is_none());

        let (_, d2) = cache.replace(snap(&[("c1", "us-east-2"), ("c2", "us-east-2")]));
        assert_eq!(d2.added, vec!["c2"]);
        assert_eq!(d2.changed, vec!["c1"]);
        assert!(d2.removed.is_empty());
        assert_eq!(cache.previous().unwrap().clusters[0].locality, "us-west-2");
        assert_eq!(cache.current().unwrap().clusters.len(), 2);

        let (_, d3) = cache.replace(snap(&[("c2", "us-east-2")]));
        assert_eq!(d3.removed, vec!["c1"]);
        assert_eq!(cache.load().epoch, 3);
        // only two snapshots are retained
        assert_eq!(cache.previous().unwrap().clusters.len(), 2);
    }
}
