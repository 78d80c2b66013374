//! OpenAI-compatible HTTP surface for ModelGate (§6).
//!
//! Listens on two ports (§6 "HTTP listen addresses for the chat port and the
//! metrics port"): the chat port serves `/v1/chat/completions`,
//! `/v1/embeddings`, and `/health`; the metrics port serves `/metrics`.
//!
//! **Public API**: [`run_chat_server`], [`run_metrics_server`], [`chat_router`].

mod auth;
mod chat;
mod embeddings;
mod error;
mod health;
mod metrics;
mod wire;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use modelgate_core::{ApiKeyDirectory, Dispatcher};

/// Shared state every handler closes over: the dispatcher and the bearer-key
/// directory that resolves `Authorization` headers to a [`TenantScope`]
/// (§6 "Authentication").
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub api_keys: Arc<dyn ApiKeyDirectory>,
}

/// Builds the chat-port router: `/v1/chat/completions`, `/v1/embeddings`,
/// `/health`.
pub fn chat_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/embeddings", post(embeddings::embeddings))
        .route("/health", get(health::health))
        .with_state(state)
}

/// Builds the metrics-port router: `/metrics` only (§6). The metrics
/// exporter itself is an external collaborator (§1 "metrics exporter
/// plumbing" is out of scope); this only serves the narrow interface.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics::metrics))
}

/// Runs the chat-port HTTP server until the listener closes.
pub async fn run_chat_server(
    addr: std::net::SocketAddr,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("chat HTTP server listening on http://{}", addr);
    axum::serve(listener, chat_router(state)).await?;
    Ok(())
}

/// Runs the metrics-port HTTP server until the listener closes.
pub async fn run_metrics_server(
    addr: std::net::SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("metrics HTTP server listening on http://{}", addr);
    axum::serve(listener, metrics_router()).await?;
    Ok(())
}
