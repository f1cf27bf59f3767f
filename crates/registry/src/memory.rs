use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tessera_core::{ClusterList, IdentityConfig};
use tokio::sync::Semaphore;

use crate::{RegistryClient, RegistryError};

/// In-memory registry with failure injection and call counters.
#[derive(Default)]
pub struct StaticRegistry {
    clusters: Mutex<ClusterList>,
    identities: Mutex<HashMap<String, IdentityConfig>>,
    failing_clusters: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    list_calls: AtomicUsize,
    identity_calls: AtomicUsize,
    bulk_calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl StaticRegistry {
    pub fn new(clusters: ClusterList) -> Self {
        Self { clusters: Mutex::new(clusters), ..Default::default() }
    }

    /// Every cluster-list or bulk call takes one permit from `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_identity(self, cluster: &str, identity: IdentityConfig) -> Self {
        self.set_identity(cluster, identity);
        self
    }

    pub fn set_clusters(&self, clusters: ClusterList) {
        *self.clusters.lock().unwrap() = clusters;
    }

    pub fn set_identity(&self, cluster: &str, identity: IdentityConfig) {
        self.identities.lock().unwrap().insert(cluster.to_string(), identity);
    }

    pub fn fail_cluster(&self, cluster: &str, fail: bool) {
        let mut set = self.failing_clusters.lock().unwrap();
        if fail { set.insert(cluster.to_string()); } else { set.remove(cluster); }
    }

    pub fn fail_list(&self, fail: bool) { self.fail_list.store(fail, Ordering::SeqCst); }

    pub fn list_calls(&self) -> usize { self.list_calls.load(Ordering::SeqCst) }
    pub fn identity_calls(&self) -> usize { self.identity_calls.load(Ordering::SeqCst) }
    pub fn bulk_calls(&self) -> usize { self.bulk_calls.load(Ordering::SeqCst) }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn identity_for(&self, cluster: &str) -> Result<IdentityConfig, RegistryError> {
        if self.failing_clusters.lock().unwrap().contains(cluster) {
            return Err(RegistryError::Unavailable(format!("identities for {}", cluster)));
        }
        Ok(self.identities.lock().unwrap().get(cluster).cloned().unwrap_or_else(|| IdentityConfig {
            cluster_name: cluster.to_string(),
            assets: Vec::new(),
        }))
    }
}

#[async_trait::async_trait]
impl RegistryClient for StaticRegistry {
    async fn get_clusters_by_identity(&self, _identity: &str) -> Result<ClusterList, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("cluster list".into()));
        }
        Ok(self.clusters.lock().unwrap().clone())
    }

    async fn get_identities_by_cluster(&self, cluster: &str) -> Result<IdentityConfig, RegistryError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        self.identity_for(cluster)
    }

    async fn bulk_sync(&self, _identity: &str) -> Result<ClusterList, RegistryError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("bulk sync".into()));
        }
        let mut list = self.clusters.lock().unwrap().clone();
        for cluster in list.clusters.iter_mut() {
            cluster.identity_config = self.identity_for(&cluster.name)?;
        }
        Ok(list)
    }
}
