//! `api` crate: HTTP surface of the chatbot engine.
//!
//! Exposes:
//!   POST   /webhooks/{device_id}
//!   GET    /api/v1/conversations/{device_id}/{prospect_num}
//!   POST   /api/v1/conversations/{device_id}/{prospect_num}/reset
//!   POST   /api/v1/conversations/{device_id}/{prospect_num}/start
//!   POST   /api/v1/flows/validate
//!   GET    /healthz
//!
//! Inbound messages are not processed on the request path: they are turned
//! into engine events and pushed onto the job queue.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use engine::{ConversationEngine, EngineEvent};
use queue::QueueHandle;

pub mod handlers;
pub mod jobs;

pub use jobs::EngineJobs;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub jobs: QueueHandle<EngineEvent>,
}

pub fn router(state: AppState) -> Router {
    use handlers::{conversations, flows, webhooks};

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/webhooks/:device_id", post(webhooks::inbound))
        .route("/api/v1/conversations/:device_id/:prospect_num", get(conversations::get))
        .route("/api/v1/conversations/:device_id/:prospect_num/reset", post(conversations::reset))
        .route("/api/v1/conversations/:device_id/:prospect_num/start", post(conversations::start))
        .route("/api/v1/flows/validate", post(flows::validate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `addr` until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
