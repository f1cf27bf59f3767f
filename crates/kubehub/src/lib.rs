//! Tessera kubehub: Shard CRD, shard API clients and watcher wiring

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use futures::stream::BoxStream;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::info;

mod crd;
mod kube_api;
mod memory;
mod watch;

pub use crd::{ClusterShards, IdentityItem, Shard, ShardCondition, ShardSpec, ShardStatus};
pub use kube_api::KubeShardApi;
pub use memory::MemoryShardApi;
pub use watch::{run_shard_watcher, WATCH_REOPEN_DELAY};

/// Cluster API failures, as seen by the shard handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("resourceVersion conflict")]
    Conflict,
    #[error("already exists")]
    AlreadyExists,
    #[error("rejected by the API server: {0}")]
    Invalid(String),
    #[error("cluster API unavailable: {0}")]
    Unavailable(String),
}

impl From<kube::Error> for ApiError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => match resp.code {
                404 => ApiError::NotFound,
                409 if resp.reason == "AlreadyExists" => ApiError::AlreadyExists,
                409 => ApiError::Conflict,
                400 | 422 => ApiError::Invalid(resp.message),
                _ => ApiError::Unavailable(format!("{} ({})", resp.message, resp.code)),
            },
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}

/// Watch notification. Payloads stay out: the pass re-reads what it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEvent {
    Applied(String),
    Deleted(String),
    /// Re-list finished with this many objects.
    Restarted(usize),
}

/// Shard CRUD plus watch against one cluster API.
#[async_trait::async_trait]
pub trait ShardApi: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Shard>, ApiError>;
    async fn create(&self, namespace: &str, shard: &Shard) -> Result<Shard, ApiError>;
    /// Replace; `metadata.resourceVersion` must match the stored object.
    async fn update(&self, namespace: &str, shard: &Shard) -> Result<Shard, ApiError>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ApiError>;
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<Shard>, ApiError>;
    fn watch(&self, namespace: &str, selector: &str) -> BoxStream<'static, Result<ShardEvent, ApiError>>;
}

/// Client from an explicit kubeconfig file, else in-cluster / default config.
pub async fn get_kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let Some(path) = kubeconfig else {
        return Client::try_default().await.context("building default kube client");
    };
    let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
    let config = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("loading kubeconfig {}", path.display()))?;
    info!(cluster_url = %config.cluster_url, "kube client configured from kubeconfig");
    Client::try_from(config).context("building kube client")
}

/// `k=v,k2=v2` equality selectors only.
pub(crate) fn selector_matches(selector: &str, labels: Option<&std::collections::BTreeMap<String, String>>) -> bool {
    selector.split(',').map(str::trim).filter(|s| !s.is_empty()).all(|term| match term.split_once('=') {
        Some((k, v)) => labels.and_then(|l| l.get(k.trim())).map(|x| x == v.trim()).unwrap_or(false),
        None => labels.map(|l| l.contains_key(term)).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;
    use std::collections::BTreeMap;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "m".into(), reason: reason.into(), code })
    }

    #[test]
    fn kube_errors_map_to_api_errors() {
        assert_eq!(ApiError::from(api_err(404, "NotFound")), ApiError::NotFound);
        assert_eq!(ApiError::from(api_err(409, "AlreadyExists")), ApiError::AlreadyExists);
        assert_eq!(ApiError::from(api_err(409, "Conflict")), ApiError::Conflict);
        assert!(matches!(ApiError::from(api_err(422, "Invalid")), ApiError::Invalid(_)));
        assert!(matches!(ApiError::from(api_err(500, "InternalError")), ApiError::Unavailable(_)));
    }

    #[test]
    fn equality_selectors() {
        let labels: BTreeMap<String, String> =
            [("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())].into_iter().collect();
        assert!(selector_matches("a=1", Some(&labels)));
        assert!(selector_matches("a=1, b=2", Some(&labels)));
        assert!(!selector_matches("a=2", Some(&labels)));
        assert!(selector_matches("", None));
        assert!(!selector_matches("a=1", None));
        assert!(selector_matches("b", Some(&labels)));
    }
}
