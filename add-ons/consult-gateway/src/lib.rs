//! Relay gateway: WebSocket session relay plus HTTP glue routes, fronting
//! the Mistral completion API for the voice consultation client.

pub mod http;
pub mod relay;

use axum::routing::{get, post};
use axum::Router;
use consult_core::CompletionBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    /// `None` when no API key is configured; handlers answer with the
    /// technical-error message instead of refusing connections.
    pub backend: Option<Arc<dyn CompletionBackend>>,
    pub uploads_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/medical-chat", get(relay::medical_chat))
        .route("/api/medical-chat", post(http::medical_chat))
        .route("/api/upload-medical-image", post(http::upload_medical_image))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
