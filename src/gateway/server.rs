//! HTTP surface: `POST /v1/agent/complete`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use tracing::{info, warn};

use crate::error::GatewayError;

use super::{CompletionResponse, Gateway, API_KEY_HEADER};

pub const COMPLETE_PATH: &str = "/v1/agent/complete";

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(COMPLETE_PATH, post(complete))
        .with_state(gateway)
}

/// Binds `listen` and serves until Ctrl-C.
pub async fn serve(gateway: Arc<Gateway>, listen: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Cannot bind {listen}"))?;
    info!("Listening on http://{}{COMPLETE_PATH}", listener.local_addr()?);

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, exiting");
        })
        .await
        .context("Server terminated with error")
}

// The body is taken as raw bytes so it parses whatever the Content-Type says
async fn complete(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CompletionResponse>, GatewayError> {
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());

    gateway
        .complete(api_key, &body)
        .await
        .map(Json)
        .inspect_err(|e| warn!("Request failed ({}): {e}", e.status()))
}
