use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tessera_core::{ClusterList, IdentityConfig};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{RegistryClient, RegistryError};

/// Registry service client over HTTP/JSON.
///
/// Routes:
/// - `GET {endpoint}/shardingmanager/{identity}/clusters`
/// - `GET {endpoint}/shardingmanager/{identity}/bulk`
/// - `GET {endpoint}/cluster/{name}/identities`
///
/// Identity and cluster names are percent-encoded as single path segments.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    endpoint: String,
    base: Url,
    http: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(RegistryError::NotInitialized);
        }
        let base = Url::parse(&endpoint).map_err(|_| RegistryError::UnsupportedEndpoint(endpoint.clone()))?;
        if base.cannot_be_a_base() {
            return Err(RegistryError::UnsupportedEndpoint(endpoint));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, base, http })
    }

    pub fn endpoint(&self) -> &str { &self.endpoint }

    /// `base` with `segments` appended, each encoded on its own.
    pub fn route(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::UnsupportedEndpoint(self.endpoint.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str], op: &'static str) -> Result<T, RegistryError> {
        let url = self.route(segments)?.to_string();
        let tid = Uuid::new_v4();
        let started = Instant::now();
        debug!(%tid, %url, op, "registry request");
        let resp = match self.http.get(&url).header("x-request-id", tid.to_string()).send().await {
            Ok(r) => r,
            Err(e) => {
                counter!("tessera_registry_errors_total", 1u64, "op" => op);
                warn!(%tid, %url, error = %e, "registry request failed");
                return Err(e.into());
            }
        };
        let status = resp.status();
        if !status.is_success() {
            counter!("tessera_registry_errors_total", 1u64, "op" => op);
            warn!(%tid, %url, status = status.as_u16(), "registry returned error status");
            return Err(RegistryError::Status { status: status.as_u16(), url });
        }
        let bytes = resp.bytes().await?;
        let out = serde_json::from_slice(&bytes)?;
        histogram!("tessera_registry_request_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_clusters_by_identity(&self, identity: &str) -> Result<ClusterList, RegistryError> {
        self.get_json(&["shardingmanager", identity.trim(), "clusters"], "clusters").await
    }

    async fn get_identities_by_cluster(&self, cluster: &str) -> Result<IdentityConfig, RegistryError> {
        self.get_json(&["cluster", cluster.trim(), "identities"], "identities").await
    }

    async fn bulk_sync(&self, identity: &str) -> Result<ClusterList, RegistryError> {
        self.get_json(&["shardingmanager", identity.trim(), "bulk"], "bulk").await
    }
}
