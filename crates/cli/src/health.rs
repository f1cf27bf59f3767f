//! Liveness, readiness, metrics and pass status over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tessera_manager::{PassStatus, Readiness};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct HealthState {
    pub status: Arc<PassStatus>,
    pub stale_after: Duration,
    pub metrics: Option<PrometheusHandle>,
}

async fn liveness() -> impl IntoResponse { (StatusCode::OK, "OK") }

async fn readiness(State(state): State<Arc<HealthState>>) -> Response {
    match state.status.readiness(state.stale_after) {
        Readiness::Ready => (StatusCode::OK, "OK").into_response(),
        Readiness::NotStarted => (StatusCode::SERVICE_UNAVAILABLE, "no successful pass yet").into_response(),
        Readiness::Stale { age_secs } => {
            (StatusCode::SERVICE_UNAVAILABLE, format!("last successful pass {}s ago", age_secs)).into_response()
        }
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> Response {
    match &state.metrics {
        Some(handle) => {
            ([("content-type", "text/plain; version=0.0.4; charset=utf-8")], handle.render()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn status(State(state): State<Arc<HealthState>>) -> impl IntoResponse { Json(state.status.report()) }

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(listener: TcpListener, state: Arc<HealthState>, cancel: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "health server listening");
    }
    axum::serve(listener, router(state)).with_graceful_shutdown(async move { cancel.cancelled().await }).await
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> { TcpListener::bind(addr).await }

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn(state: Arc<HealthState>) -> (String, CancellationToken) {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, state, cancel.clone()));
        (base, cancel)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn probes_follow_pass_status() {
        let status = Arc::new(PassStatus::new());
        let state = Arc::new(HealthState { status: status.clone(), stale_after: Duration::from_secs(60), metrics: None });
        let (base, cancel) = spawn(state).await;
        let http = reqwest::Client::new();

        let live = http.get(format!("{}/liveness", base)).send().await.unwrap();
        assert_eq!(live.status(), 200);
        assert_eq!(live.text().await.unwrap(), "OK");

        let ready = http.get(format!("{}/readiness", base)).send().await.unwrap();
        assert_eq!(ready.status(), 503);

        status.record_success(Duration::from_millis(3), 1);
        let ready = http.get(format!("{}/readiness", base)).send().await.unwrap();
        assert_eq!(ready.status(), 200);

        let report: serde_json::Value = http.get(format!("{}/status", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(report["passes"], 1);
        assert_eq!(report["shards"], 1);

        let m = http.get(format!("{}/metrics", base)).send().await.unwrap();
        assert_eq!(m.status(), 404);
        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_success_is_not_ready() {
        let status = Arc::new(PassStatus::new());
        status.record_success(Duration::from_millis(1), 1);
        let state = Arc::new(HealthState { status, stale_after: Duration::ZERO, metrics: None });
        let (base, cancel) = spawn(state).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let ready = reqwest::get(format!("{}/readiness", base)).await.unwrap();
        assert_eq!(ready.status(), 503);
        cancel.cancel();
    }
}
