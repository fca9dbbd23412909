//! Webhook ingress.
//!
//! Accepts platform webhooks and answers health checks. Events are logged
//! and dropped: reconciliation is driven by the cycle loop alone.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const EVENT_HEADER: &str = "X-Gitee-Event";

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Build the ingress router.
pub fn router(started: Instant) -> Router {
    Router::new()
        .route("/gitee-hook", post(gitee_hook))
        .route("/health", get(health))
        .with_state(started)
        .layer(TraceLayer::new_for_http())
}

/// Serve the ingress until the listener fails.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server stops.
pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Webhook ingress listening");

    axum::serve(listener, router(Instant::now())).await
}

async fn gitee_hook(headers: HeaderMap) -> StatusCode {
    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    debug!(event, "Ignoring webhook event");
    StatusCode::OK
}

async fn health(State(started): State<Instant>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: started.elapsed().as_secs(),
    })
}
