use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use once_cell::sync::Lazy;
use regex::Regex;
use tessera_core::{ShardError, ShardResult, ShardingManagerParams, TopologySnapshot, TOPOLOGY_VERSION_ANNOTATION};
use tessera_kubehub::{ClusterShards, IdentityItem, Shard, ShardSpec};

static DNS_SUBDOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap());
static LABEL_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").unwrap());

/// Object name for a shard key: `shard-<key>`, lower-cased, DNS-1123 subdomain.
pub fn shard_name(shard_key: &str) -> ShardResult<String> {
    let name = format!("shard-{}", shard_key.trim()).to_lowercase();
    if name.len() > 253 || !DNS_SUBDOMAIN.is_match(&name) {
        return Err(ShardError::InvalidShardSpec(format!("shard name {:?} is not a valid DNS-1123 subdomain", name)));
    }
    Ok(name)
}

fn label_value(what: &str, value: &str) -> ShardResult<String> {
    if value.trim().is_empty() {
        return Err(ShardError::InvalidShardSpec(format!("{} must not be empty", what)));
    }
    if value.len() > 63 || !LABEL_VALUE.is_match(value) {
        return Err(ShardError::InvalidShardSpec(format!("{} {:?} is not a valid label value", what, value)));
    }
    Ok(value.to_string())
}

/// Desired Shard for one assignment. Deterministic, no I/O.
pub fn build_shard(
    snapshot: &TopologySnapshot,
    params: &ShardingManagerParams,
    shard_key: &str,
    operator_identity: &str,
) -> ShardResult<Shard> {
    params.validate()?;
    let name = shard_name(shard_key)?;

    let mut labels = BTreeMap::new();
    labels.insert(params.shard_identity_label.clone(), label_value("sharding manager identity", &params.identity)?);
    labels.insert(params.operator_identity_label.clone(), label_value("operator identity", operator_identity)?);

    let annotations = snapshot
        .resource_version
        .as_ref()
        .filter(|v| !v.is_empty())
        .map(|v| BTreeMap::from([(TOPOLOGY_VERSION_ANNOTATION.to_string(), v.clone())]));

    let clusters = snapshot
        .clusters
        .iter()
        .map(|c| ClusterShards {
            name: c.name.clone(),
            locality: c.locality.clone(),
            identities: c
                .identity_config
                .assets
                .iter()
                .map(|a| IdentityItem { name: a.name.clone(), environment: a.environment.clone() })
                .collect(),
        })
        .collect();

    Ok(Shard {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(params.namespace.clone()),
            labels: Some(labels),
            annotations,
            ..Default::default()
        },
        spec: ShardSpec { clusters },
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;
    use tessera_core::{AssetEntry, ClusterConfig, IdentityConfig};

    fn cluster(name: &str, locality: &str, assets: &[(&str, &str)]) -> ClusterConfig {
        ClusterConfig {
            name: name.into(),
            locality: locality.into(),
            identity_config: IdentityConfig {
                cluster_name: name.into(),
                assets: assets
                    .iter()
                    .map(|(a, e)| AssetEntry { name: a.to_string(), environment: e.to_string(), is_source_asset: true, ..Default::default() })
                    .collect(),
            },
        }
    }

    #[test]
    fn builds_the_documented_scenario() {
        let snap = TopologySnapshot {
            clusters: vec![cluster("c1", "us-west-2", &[("svcA", "prod")]), cluster("c2", "us-east-2", &[])],
            ..Default::default()
        };
        let params = ShardingManagerParams::new("mgr1", "op", "shard-ns");
        let shard = build_shard(&snap, &params, "0-1", "op").unwrap();

        assert_eq!(shard.name_any(), "shard-0-1");
        assert_eq!(shard.namespace().as_deref(), Some("shard-ns"));
        let labels = shard.labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["admiral.io/shardIdentity"], "mgr1");
        assert_eq!(labels["admiral.io/operatorIdentity"], "op");
        assert!(shard.metadata.annotations.is_none());

        let c = &shard.spec.clusters;
        assert_eq!(c.len(), 2);
        assert_eq!((c[0].name.as_str(), c[0].locality.as_str()), ("c1", "us-west-2"));
        assert_eq!(c[0].identities, vec![IdentityItem { name: "svcA".into(), environment: "prod".into() }]);
        assert_eq!(c[1].locality, "us-east-2");
        assert!(c[1].identities.is_empty());
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let snap = TopologySnapshot { clusters: vec![cluster("c1", "x", &[("a", "e")])], resource_version: Some("7".into()), ..Default::default() };
        let params = ShardingManagerParams::new("mgr1", "op", "ns");
        let a = build_shard(&snap, &params, "0", "op").unwrap();
        let b = build_shard(&snap, &params, "0", "op").unwrap();
        assert_eq!(a.metadata, b.metadata);
        assert_eq!(a.spec, b.spec);
        assert_eq!(a.annotations()[TOPOLOGY_VERSION_ANNOTATION], "7");
    }

    #[test]
    fn empty_snapshot_gives_empty_shard() {
        let params = ShardingManagerParams::new("mgr1", "op", "ns");
        let shard = build_shard(&TopologySnapshot::default(), &params, "0", "op").unwrap();
        assert!(shard.spec.clusters.is_empty());
    }

    #[test]
    fn rejects_invalid_inputs() {
        let snap = TopologySnapshot::default();
        let params = ShardingManagerParams::new("mgr1", "op", "ns");
        assert!(matches!(build_shard(&snap, &params, "0", ""), Err(ShardError::InvalidShardSpec(_))));
        assert!(matches!(build_shard(&snap, &params, "bad key!", "op"), Err(ShardError::InvalidShardSpec(_))));
        assert!(matches!(build_shard(&snap, &params, "0", "has space"), Err(ShardError::InvalidShardSpec(_))));
        let no_identity = ShardingManagerParams::new("", "op", "ns");
        assert!(matches!(build_shard(&snap, &no_identity, "0", "op"), Err(ShardError::InvalidShardSpec(_))));
        assert_eq!(shard_name("East-1").unwrap(), "shard-east-1");
    }
}
