#![forbid(unsafe_code)]

use std::time::Duration;

use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
use tessera_registry::{HttpRegistryClient, RegistryClient, RegistryError};

async fn serve() -> String {
    let app = Router::new()
        .route(
            "/shardingmanager/:identity/clusters",
            get(|Path(identity): Path<String>| async move {
                if identity != "devx" {
                    return Err(StatusCode::NOT_FOUND);
                }
                Ok(Json(serde_json::json!({
                    "clusters": [
                        {"name": "cluster1", "locality": "us-west-2", "metadata": {}},
                        {"name": "cluster2", "locality": "us-east-2", "metadata": {}}
                    ],
                    "lastUpdatedTime": "2024-06-20T18:25:43.511Z",
                    "resourceVersion": "1.2.3"
                })))
            }),
        )
        .route(
            "/cluster/:name/identities",
            get(|Path(name): Path<String>| async move {
                Json(serde_json::json!({
                    "clustername": name,
                    "assetList": [{"asset": "identity1", "environment": "prod", "sourceAsset": true}]
                }))
            }),
        )
        .route("/shardingmanager/:identity/bulk", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}/", addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetches_clusters_and_identities() {
    let endpoint = serve().await;
    let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5)).unwrap();
    assert!(!client.endpoint().ends_with('/'));

    let list = client.get_clusters_by_identity("devx").await.unwrap();
    let names: Vec<_> = list.clusters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["cluster1", "cluster2"]);
    assert_eq!(list.last_updated_time.as_deref(), Some("2024-06-20T18:25:43.511Z"));

    let ids = client.get_identities_by_cluster("cluster2").await.unwrap();
    assert_eq!(ids.cluster_name, "cluster2");
    assert_eq!(ids.assets[0].environment, "prod");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn names_are_sent_as_single_path_segments() {
    let endpoint = serve().await;
    let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5)).unwrap();

    let url = client.route(&["cluster", "east/1?x#y", "identities"]).unwrap();
    assert_eq!(url.path(), "/cluster/east%2F1%3Fx%23y/identities");
    assert!(url.query().is_none() && url.fragment().is_none());

    let ids = client.get_identities_by_cluster("east/1?x#y").await.unwrap();
    assert_eq!(ids.cluster_name, "east/1?x#y");

    let nested = HttpRegistryClient::new("http://registry.local/api/v1/", Duration::from_secs(5)).unwrap();
    assert_eq!(nested.route(&["cluster", "c1", "identities"]).unwrap().path(), "/api/v1/cluster/c1/identities");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_statuses_surface_as_status_errors() {
    let endpoint = serve().await;
    let client = HttpRegistryClient::new(&endpoint, Duration::from_secs(5)).unwrap();

    match client.get_clusters_by_identity("unknown").await {
        Err(RegistryError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected 404, got {:?}", other),
    }
    match client.bulk_sync("devx").await {
        Err(RegistryError::Status { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected 503, got {:?}", other),
    }
}
