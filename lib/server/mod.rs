pub mod monitoring;
use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::http::StatusCode;
use axum::{extract::State, routing::get, Router};
use monitoring::SCRAPE_METRICS;
use std::net::SocketAddr;
use std::sync::Arc;

async fn health_handler() -> &'static str {
    "Healthy"
}

async fn expose_metrics(state: State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state)
}

/// Registers scrape metrics and serves `/health` and `/metrics` on `addr` until the state's
/// shutdown token fires.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    {
        let mut registry = state.registry.write().await;

        SCRAPE_METRICS
            .get_or_init(|| async { monitoring::ScrapeMetrics::register(&mut registry, "scrape") })
            .await;

        monitoring::register_build_info_metric(&mut registry, "namesync");
    }

    let shutdown_token = state.shutdown_token.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
            })
            .await;
        if let Err(err) = result {
            tracing::error!(event = "metrics_server_failed", error = %err, "metrics server exited");
        }
    });

    Ok(server_handle)
}
