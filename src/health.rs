// ABOUTME: HTTP health and metrics endpoints served with axum
// ABOUTME: GET /health answers "ok"; GET /metrics renders Prometheus text

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Build the router for the health surface
pub fn router(metrics_handle: PrometheusHandle) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(metrics_handle));

    Router::new()
        .route("/health", get(health_handler))
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until `shutdown` fires
pub async fn start_health_server(
    addr: &str,
    metrics_handle: PrometheusHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", addr))?;
    tracing::info!(addr = %addr, "Health server listening");

    axum::serve(listener, router(metrics_handle))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Health server failed")?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Handle GET /metrics - returns Prometheus text format
async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
