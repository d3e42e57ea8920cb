//! HTTP endpoints for topicsync-relay.
//!
//! Provides health checks, live session status, and Prometheus metrics.

pub mod health;
mod metrics;
mod sessions;

use crate::server::SyncRelay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<SyncRelay>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/status", get(sessions::status_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

/// Serve the router on `bind_address` until the task is cancelled.
pub async fn serve(relay: Arc<SyncRelay>, bind_address: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!("HTTP endpoints on {}", listener.local_addr()?);
    axum::serve(listener, build_router(relay)).await
}
