//! Tessera registry: read-only clients for cluster and identity topology.
//!
//! The registry is the source of truth for which clusters a sharding manager
//! identity owns and which workload identities run in each cluster. Three
//! variants share the [`RegistryClient`] trait:
//! - [`HttpRegistryClient`] for the registry service,
//! - [`FileRegistryClient`] for `file://` endpoints (JSON documents on disk),
//! - [`StaticRegistry`], an in-memory variant with failure injection for tests.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tessera_core::{ClusterList, IdentityConfig};

mod file;
mod http;
mod memory;

pub use file::FileRegistryClient;
pub use http::HttpRegistryClient;
pub use memory::StaticRegistry;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry client is not initialized: empty endpoint")]
    NotInitialized,
    #[error("unsupported registry endpoint: {0}")]
    UnsupportedEndpoint(String),
    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding registry payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the registry service.
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    /// Clusters assigned to a sharding manager identity, in registry order.
    async fn get_clusters_by_identity(&self, identity: &str) -> Result<ClusterList, RegistryError>;

    /// Identities (assets) registered for one cluster.
    async fn get_identities_by_cluster(&self, cluster: &str) -> Result<IdentityConfig, RegistryError>;

    /// Clusters with their identities embedded, in a single call.
    async fn bulk_sync(&self, identity: &str) -> Result<ClusterList, RegistryError>;
}

/// Pick a client variant from the endpoint scheme.
pub fn client_for_endpoint(endpoint: &str, timeout: Duration) -> Result<Arc<dyn RegistryClient>, RegistryError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(RegistryError::NotInitialized);
    }
    if let Some(dir) = endpoint.strip_prefix("file://") {
        return Ok(Arc::new(FileRegistryClient::new(dir)));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(Arc::new(HttpRegistryClient::new(endpoint, timeout)?));
    }
    Err(RegistryError::UnsupportedEndpoint(endpoint.to_string()))
}
