//! Gateway entry point. Loopback only; the relay holds the API key and the
//! browser/call client never sees it.

use consult_core::{CoreConfig, MistralClient};
use consult_gateway::{router, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::from_env();

    let backend = config.mistral_api_key.as_ref().map(|key| {
        Arc::new(MistralClient::new(key.clone(), config.mistral_model.clone()))
            as Arc<dyn consult_core::CompletionBackend>
    });
    if backend.is_none() {
        tracing::warn!(
            "MISTRAL_API_KEY not set: chat endpoints will answer with the technical-error message"
        );
    }

    let state = AppState { backend, uploads_dir: config.uploads_dir.clone().into() };
    let app = router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("consult-gateway listening on {} (model {})", addr, config.mistral_model);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }
}
