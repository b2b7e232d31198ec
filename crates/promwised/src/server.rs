//! HTTP server for promwised

use crate::agent::Agent;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub agent: Arc<Agent>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            start_time: Instant::now(),
        }
    }
}

/// Full route table with request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::analysis_routes())
        .merge(routes::alert_routes())
        .merge(routes::metrics_routes())
        .merge(routes::health_routes())
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` is cancelled
pub async fn run(state: AppState, host: &str, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
