use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tessera_core::{ClusterList, IdentityConfig};
use tracing::debug;

use crate::{RegistryClient, RegistryError};

/// Registry documents read from a directory:
/// `<identity>.json`, `<identity>-bulk.json` and `<cluster>.json`.
#[derive(Debug, Clone)]
pub struct FileRegistryClient {
    dir: PathBuf,
}

impl FileRegistryClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    async fn read<T: DeserializeOwned>(&self, file: String) -> Result<T, RegistryError> {
        let path = self.dir.join(file);
        debug!(path = %path.display(), "reading registry document");
        let bytes = tokio::fs::read(&path).await.map_err(|source| RegistryError::Io { path: path.clone(), source })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait::async_trait]
impl RegistryClient for FileRegistryClient {
    async fn get_clusters_by_identity(&self, identity: &str) -> Result<ClusterList, RegistryError> {
        self.read(format!("{}.json", identity.trim())).await
    }

    async fn get_identities_by_cluster(&self, cluster: &str) -> Result<IdentityConfig, RegistryError> {
        self.read(format!("{}.json", cluster.trim())).await
    }

    async fn bulk_sync(&self, identity: &str) -> Result<ClusterList, RegistryError> {
        self.read(format!("{}-bulk.json", identity.trim())).await
    }
}
