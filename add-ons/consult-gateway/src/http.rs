//! Plain HTTP routes: health probe, one-shot chat, and image upload.
//!
//! The one-shot chat endpoint serves clients that cannot hold a WebSocket
//! open. It uses a short system prompt and no history; the full consultation
//! prompt belongs to the relay sessions.

use crate::AppState;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;
use consult_core::{new_session_id, ChatMessage};
use serde::Deserialize;
use tracing::{info, warn};

const ONE_SHOT_PROMPT: &str =
    "Tu es un assistant médical IA français. Sois empathique et professionnel.";

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(rename = "sessionId")]
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "consult-gateway",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn chat_error(status: StatusCode) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": "Erreur lors de la consultation IA",
        })),
    )
}

/// POST /api/medical-chat: single stateless exchange.
pub async fn medical_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let backend = state
        .backend
        .as_deref()
        .ok_or_else(|| chat_error(StatusCode::SERVICE_UNAVAILABLE))?;

    let session_id = body.session_id.unwrap_or_else(new_session_id);
    let messages = vec![ChatMessage::system(ONE_SHOT_PROMPT), ChatMessage::user(body.message)];

    let reply = backend.complete(&messages, 0.3, 400).await.map_err(|e| {
        warn!("http: one-shot completion failed: {}", e);
        chat_error(StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    Ok(Json(serde_json::json!({
        "success": true,
        "response": reply,
        "sessionId": session_id,
    })))
}

/// POST /api/upload-medical-image: store the file (base64, like the rest of
/// the pipeline expects) and acknowledge. Analysis itself is answered over
/// the relay with its fixed pending message.
pub async fn upload_medical_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let bad_request = |msg: &str| {
        (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg })))
    };
    let server_error = || {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "success": false,
                "error": "Erreur lors du traitement de l'image",
            })),
        )
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request("Aucun fichier uploadé"))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let data = field.bytes().await.map_err(|_| bad_request("Aucun fichier uploadé"))?;
        if data.is_empty() {
            return Err(bad_request("Aucun fichier uploadé"));
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        let image_id = format!("medical_image_{}.txt", uuid::Uuid::new_v4().simple());
        let path = state.uploads_dir.join(&image_id);
        tokio::fs::create_dir_all(&state.uploads_dir)
            .await
            .map_err(|_| server_error())?;
        tokio::fs::write(&path, encoded).await.map_err(|_| server_error())?;

        info!("http: stored medical image {} ({} bytes)", image_id, data.len());
        return Ok(Json(serde_json::json!({
            "success": true,
            "message": "Image reçue. L'analyse sera bientôt disponible.",
            "imageId": image_id,
        })));
    }

    Err(bad_request("Aucun fichier uploadé"))
}
