use std::sync::Arc;

use kube::ResourceExt;
use metrics::counter;
use serde::Serialize;
use tessera_core::{ShardError, ShardResult};
use tessera_kubehub::{ApiError, Shard, ShardApi};
use tracing::{debug, info, warn};

use crate::diff::spec_diff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Unchanged => "unchanged",
        }
    }
}

fn unavailable(name: &str, e: ApiError) -> ShardError {
    match e {
        ApiError::Invalid(msg) => ShardError::InvalidShardSpec(format!("{}: {}", name, msg)),
        other => ShardError::ResourceUnavailable(format!("{}: {}", name, other)),
    }
}

/// Labels, annotations and spec match. Absent maps equal empty ones.
pub fn in_sync(observed: &Shard, desired: &Shard) -> bool {
    observed.labels() == desired.labels() && observed.annotations() == desired.annotations() && observed.spec == desired.spec
}

/// Owner recorded on `observed` under `owner_label` when it differs from the
/// one `desired` carries.
pub fn foreign_owner<'a>(observed: &'a Shard, desired: &Shard, owner_label: &str) -> Option<&'a str> {
    let theirs = observed.labels().get(owner_label)?;
    (desired.labels().get(owner_label) != Some(theirs)).then_some(theirs.as_str())
}

/// Observed object with the desired labels, annotations and spec.
/// Everything else, resourceVersion included, is kept.
fn merged(observed: &Shard, desired: &Shard) -> Shard {
    let mut next = observed.clone();
    next.metadata.labels = desired.metadata.labels.clone();
    next.metadata.annotations = desired.metadata.annotations.clone();
    next.spec = desired.spec.clone();
    next
}

/// Create-or-update of Shard objects in one namespace.
#[derive(Clone)]
pub struct ShardHandler {
    api: Arc<dyn ShardApi>,
    namespace: String,
    owner_label: Option<String>,
}

impl ShardHandler {
    pub fn new(api: Arc<dyn ShardApi>, namespace: impl Into<String>) -> Self {
        Self { api, namespace: namespace.into(), owner_label: None }
    }

    /// Warn when a shard being updated carries another manager's value under `label`.
    pub fn with_owner_label(mut self, label: impl Into<String>) -> Self {
        self.owner_label = Some(label.into());
        self
    }

    pub fn namespace(&self) -> &str { &self.namespace }

    /// Converge the stored object on `desired`. Writes only when something differs.
    pub async fn reconcile(&self, desired: &Shard) -> ShardResult<ReconcileOutcome> {
        let name = desired.name_any();
        let observed = self.api.get(&self.namespace, &name).await.map_err(|e| unavailable(&name, e))?;
        match observed {
            Some(observed) => self.update_from(observed, desired).await,
            None => match self.api.create(&self.namespace, desired).await {
                Ok(_) => {
                    counter!("tessera_shard_write_total", 1u64, "op" => "create");
                    info!(shard = %name, namespace = %self.namespace, clusters = desired.spec.clusters.len(), "shard created");
                    Ok(ReconcileOutcome::Created)
                }
                Err(ApiError::AlreadyExists) => {
                    debug!(shard = %name, "shard appeared concurrently; updating instead");
                    let observed = self
                        .api
                        .get(&self.namespace, &name)
                        .await
                        .map_err(|e| unavailable(&name, e))?
                        .ok_or_else(|| ShardError::ResourceConflict(name.clone()))?;
                    self.update_from(observed, desired).await
                }
                Err(e) => Err(unavailable(&name, e)),
            },
        }
    }

    async fn update_from(&self, mut observed: Shard, desired: &Shard) -> ShardResult<ReconcileOutcome> {
        let name = desired.name_any();
        for attempt in 0..2 {
            if in_sync(&observed, desired) {
                debug!(shard = %name, "shard unchanged");
                return Ok(ReconcileOutcome::Unchanged);
            }
            if let Some(owner) = self.owner_label.as_deref().and_then(|l| foreign_owner(&observed, desired, l)) {
                counter!("tessera_shard_owner_collision_total", 1u64);
                warn!(shard = %name, namespace = %self.namespace, owner = %owner, "shard is owned by another manager; overwriting");
            }
            let diff = spec_diff(&observed.spec, &desired.spec);
            match self.api.update(&self.namespace, &merged(&observed, desired)).await {
                Ok(_) => {
                    counter!("tessera_shard_write_total", 1u64, "op" => "update");
                    info!(shard = %name, adds = diff.adds, updates = diff.updates, removes = diff.removes, "shard updated");
                    return Ok(ReconcileOutcome::Updated);
                }
                Err(ApiError::Conflict | ApiError::NotFound) if attempt == 0 => {
                    counter!("tessera_shard_conflict_retry_total", 1u64);
                    warn!(shard = %name, "stale resourceVersion; re-reading shard and retrying once");
                    match self.api.get(&self.namespace, &name).await.map_err(|e| unavailable(&name, e))? {
                        Some(fresh) => observed = fresh,
                        None => return self.create_after_conflict(desired).await,
                    }
                }
                Err(ApiError::Conflict | ApiError::NotFound) => return Err(ShardError::ResourceConflict(name)),
                Err(e) => return Err(unavailable(&name, e)),
            }
        }
        Err(ShardError::ResourceConflict(name))
    }

    async fn create_after_conflict(&self, desired: &Shard) -> ShardResult<ReconcileOutcome> {
        let name = desired.name_any();
        match self.api.create(&self.namespace, desired).await {
            Ok(_) => {
                counter!("tessera_shard_write_total", 1u64, "op" => "create");
                info!(shard = %name, "shard re-created after concurrent delete");
                Ok(ReconcileOutcome::Created)
            }
            Err(ApiError::AlreadyExists | ApiError::Conflict) => Err(ShardError::ResourceConflict(name)),
            Err(e) => Err(unavailable(&name, e)),
        }
    }

    /// Delete one shard. `Ok(false)` when it was already gone.
    pub async fn delete(&self, name: &str) -> ShardResult<bool> {
        match self.api.delete(&self.namespace, name).await {
            Ok(()) => {
                counter!("tessera_shard_write_total", 1u64, "op" => "delete");
                info!(shard = %name, namespace = %self.namespace, "shard deleted");
                Ok(true)
            }
            Err(ApiError::NotFound) => Ok(false),
            Err(e) => Err(unavailable(name, e)),
        }
    }

    /// Delete every shard matched by `owner_selector` whose name is not in `keep`.
    /// Returns the names actually removed.
    pub async fn prune(&self, owner_selector: &str, keep: &[String]) -> ShardResult<Vec<String>> {
        let owned = self
            .api
            .list(&self.namespace, owner_selector)
            .await
            .map_err(|e| ShardError::ResourceUnavailable(format!("listing shards ({}): {}", owner_selector, e)))?;
        let mut removed = Vec::new();
        for shard in owned {
            let name = shard.name_any();
            if keep.iter().any(|k| *k == name) {
                continue;
            }
            if self.delete(&name).await? {
                removed.push(name);
            }
        }
        Ok(removed)
    }
}
