#![forbid(unsafe_code)]

use std::sync::Arc;

use tessera_core::{AssetEntry, ClusterConfig, ClusterList, IdentityConfig, ShardError};
use tessera_registry::StaticRegistry;
use tessera_store::{RegistrySync, SyncMode, TopologyCache};

fn cluster(name: &str, locality: &str) -> ClusterConfig {
    ClusterConfig { name: name.into(), locality: locality.into(), ..Default::default() }
}

fn ids(cluster: &str, assets: &[(&str, &str)]) -> IdentityConfig {
    IdentityConfig {
        cluster_name: cluster.into(),
        assets: assets
            .iter()
            .map(|(a, env)| AssetEntry { name: a.to_string(), environment: env.to_string(), is_source_asset: true, ..Default::default() })
            .collect(),
    }
}

fn registry(names: &[&str]) -> StaticRegistry {
    let list = ClusterList {
        clusters: names.iter().map(|n| cluster(n, "us-west-2")).collect(),
        resource_version: Some("1.2.3".into()),
        last_updated_time: None,
    };
    let mut reg = StaticRegistry::new(list);
    for n in names {
        reg = reg.with_identity(n, ids(n, &[("identity1", "prod")]));
    }
    reg
}

#[tokio::test]
async fn per_cluster_sync_preserves_registry_order() {
    let reg = Arc::new(registry(&["c3", "c1", "c2", "c0"]));
    let sync = RegistrySync::new(reg.clone(), "devx").with_concurrency(2);
    let snap = sync.sync().await.unwrap();

    assert_eq!(snap.cluster_names().collect::<Vec<_>>(), vec!["c3", "c1", "c2", "c0"]);
    assert_eq!(snap.resource_version.as_deref(), Some("1.2.3"));
    assert_eq!(snap.identity_count(), 4);
    assert_eq!(reg.list_calls(), 1);
    assert_eq!(reg.identity_calls(), 4);
    assert_eq!(snap.cluster("c1").unwrap().identity_config.cluster_name, "c1");
}

#[tokio::test]
async fn failed_identity_fetch_leaves_cache_untouched() {
    let reg = Arc::new(registry(&["c1", "c2"]));
    let sync = RegistrySync::new(reg.clone(), "devx");
    let cache = TopologyCache::new();

    let first = sync.sync().await.unwrap();
    cache.replace(first);
    assert_eq!(cache.epoch(), 1);

    reg.set_clusters(ClusterList { clusters: vec![cluster("c1", "x"), cluster("c2", "x"), cluster("c3", "x")], ..Default::default() });
    reg.fail_cluster("c2", true);
    match sync.sync().await {
        Err(ShardError::PartialTopology { cluster, .. }) => assert_eq!(cluster, "c2"),
        other => panic!("expected partial topology, got {:?}", other),
    }
    // nothing was swapped in
    assert_eq!(cache.epoch(), 1);
    assert_eq!(cache.current().unwrap().clusters.len(), 2);

    reg.fail_cluster("c2", false);
    let third = sync.sync().await.unwrap();
    let (_, diff) = cache.replace(third);
    assert_eq!(diff.added, vec!["c3"]);
    assert_eq!(diff.changed, vec!["c1", "c2"]);
}

#[tokio::test]
async fn list_failure_is_registry_unavailable() {
    let reg = Arc::new(registry(&["c1"]));
    reg.fail_list(true);
    let err = RegistrySync::new(reg.clone(), "devx").sync().await.unwrap_err();
    assert!(matches!(err, ShardError::RegistryUnavailable(_)), "got {err}");
    assert!(err.is_retryable());
    assert_eq!(reg.identity_calls(), 0);
}

#[tokio::test]
async fn empty_cluster_list_is_a_valid_snapshot() {
    let reg = Arc::new(StaticRegistry::new(ClusterList::default()));
    let snap = RegistrySync::new(reg, "devx").sync().await.unwrap();
    assert!(snap.is_empty());
}

#[tokio::test]
async fn duplicates_and_unnamed_clusters_are_normalized() {
    let reg = Arc::new(registry(&[]));
    reg.set_clusters(ClusterList {
        clusters: vec![cluster("c1", "us-west-2"), cluster("", "nowhere"), cluster("c2", "us-east-2"), cluster("c1", "eu-west-1")],
        ..Default::default()
    });
    let snap = RegistrySync::new(reg.clone(), "devx").sync().await.unwrap();
    let got: Vec<_> = snap.clusters.iter().map(|c| (c.name.as_str(), c.locality.as_str())).collect();
    assert_eq!(got, vec![("c1", "eu-west-1"), ("c2", "us-east-2")]);
    assert_eq!(reg.identity_calls(), 2);
}

#[tokio::test]
async fn bulk_mode_uses_one_call() {
    let reg = Arc::new(registry(&["c1", "c2"]));
    let sync = RegistrySync::new(reg.clone(), "devx").with_mode(SyncMode::Bulk);
    let snap = sync.sync().await.unwrap();
    assert_eq!(reg.bulk_calls(), 1);
    assert_eq!(reg.list_calls(), 0);
    assert_eq!(snap.identity_count(), 2);
    assert_eq!(snap.cluster("c2").unwrap().identity_config.assets[0].name, "identity1");
}
