//! Session relay: one WebSocket per active consultation.
//!
//! Each connection gets its own session id, its own conversation history,
//! and a greeting as the first frame. Events are handled strictly in arrival
//! order on the connection task, so replies always see the full history of
//! everything before them. The Mistral API key never leaves this process.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use consult_core::{
    detect_urgency, new_session_id, ChatMessage, ClientEvent, CompletionBackend, ServerEvent,
    Session, SymptomReport, SYSTEM_PROMPT,
};
use futures_util::{Sink, SinkExt, StreamExt};
use tracing::{debug, info, warn};

/// First frame on every connection.
pub const GREETING: &str = "Bonjour ! Je suis votre assistant médical IA. Décrivez-moi vos symptômes et je vous aiderai à évaluer votre situation.";
/// User-visible text for any backend failure. Details stay in the logs.
pub const TECHNICAL_ERROR: &str =
    "Désolé, une erreur technique s'est produite. Veuillez réessayer.";
/// Fixed reply while image analysis is not wired to a vision model.
pub const IMAGE_PENDING: &str = "L'analyse d'images sera bientôt disponible. En attendant, décrivez-moi ce que vous observez.";

const CHAT_TEMPERATURE: f32 = 0.3;
const CHAT_MAX_TOKENS: u32 = 500;
const ANALYSIS_TEMPERATURE: f32 = 0.2;
const ANALYSIS_MAX_TOKENS: u32 = 600;

pub async fn medical_chat(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = new_session_id();
    let mut session = Session::new(session_id.clone());
    info!("relay: session {} opened", session_id);

    let (mut sender, mut receiver) = socket.split();

    let greeting = ServerEvent::AiResponse {
        message: GREETING.to_string(),
        urgency_level: None,
        session_id: session_id.clone(),
    };
    if send_event(&mut sender, &greeting).await.is_err() {
        return;
    }

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                debug!("relay: session {} read error: {}", session_id, e);
                break;
            }
        };

        let text = match frame {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let event = decode_event(&session_id, &text);
        if let Some(reply) = handle_event(&mut session, event, state.backend.as_deref()).await {
            if send_event(&mut sender, &reply).await.is_err() {
                break;
            }
        }
    }

    info!(
        "relay: session {} closed after {} turn(s)",
        session_id,
        session.history().len()
    );
}

async fn send_event(
    sender: &mut (impl Sink<Message> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            warn!("relay: serialize failed: {}", e);
            return Err(());
        }
    };
    sender.send(Message::Text(payload)).await.map_err(|_| ())
}

/// Tolerant frame decode: a malformed frame is logged and ignored, the same
/// treatment as an event kind outside the closed set.
fn decode_event(session_id: &str, text: &str) -> ClientEvent {
    serde_json::from_str(text).unwrap_or_else(|e| {
        warn!("relay: session {} malformed frame ignored: {}", session_id, e);
        ClientEvent::Unknown
    })
}

/// Handle one client event against one session. Returns the reply to send,
/// or `None` for event kinds outside the closed set.
pub async fn handle_event(
    session: &mut Session,
    event: ClientEvent,
    backend: Option<&dyn CompletionBackend>,
) -> Option<ServerEvent> {
    match event {
        ClientEvent::UserMessage { message } => {
            Some(answer_user_message(session, message, backend).await)
        }
        ClientEvent::SymptomAnalysis { symptoms } => {
            Some(analyze_symptoms(session, &symptoms, backend).await)
        }
        ClientEvent::ImageAnalysis { image_data, prompt } => {
            debug!(
                "relay: session {} image analysis requested ({} bytes base64, prompt {:?})",
                session.id(),
                image_data.len(),
                prompt
            );
            Some(ServerEvent::ImageAnalysisResult {
                message: IMAGE_PENDING.to_string(),
                session_id: session.id().to_string(),
            })
        }
        ClientEvent::Unknown => {
            debug!("relay: session {} unknown event kind ignored", session.id());
            None
        }
    }
}

async fn answer_user_message(
    session: &mut Session,
    message: String,
    backend: Option<&dyn CompletionBackend>,
) -> ServerEvent {
    session.push_user(message);

    let backend = match backend {
        Some(b) => b,
        None => {
            warn!("relay: session {} has no completion backend", session.id());
            return ServerEvent::Error { message: TECHNICAL_ERROR.to_string() };
        }
    };

    match backend
        .complete(&session.completion_messages(), CHAT_TEMPERATURE, CHAT_MAX_TOKENS)
        .await
    {
        Ok(reply) => {
            // The urgency label is read off what the assistant recommends,
            // not off the user's wording.
            let urgency = detect_urgency(&reply);
            session.push_assistant(reply.clone(), Some(urgency));
            ServerEvent::AiResponse {
                message: reply,
                urgency_level: Some(urgency),
                session_id: session.id().to_string(),
            }
        }
        Err(e) => {
            warn!("relay: session {} completion failed: {}", session.id(), e);
            ServerEvent::Error { message: TECHNICAL_ERROR.to_string() }
        }
    }
}

async fn analyze_symptoms(
    session: &mut Session,
    symptoms: &serde_json::Value,
    backend: Option<&dyn CompletionBackend>,
) -> ServerEvent {
    let backend = match backend {
        Some(b) => b,
        None => return ServerEvent::Error { message: TECHNICAL_ERROR.to_string() },
    };

    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(analysis_prompt(symptoms)),
    ];

    let raw = match backend.complete(&messages, ANALYSIS_TEMPERATURE, ANALYSIS_MAX_TOKENS).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("relay: session {} symptom analysis failed: {}", session.id(), e);
            return ServerEvent::Error { message: TECHNICAL_ERROR.to_string() };
        }
    };

    match parse_symptom_report(&raw) {
        Some(analysis) => ServerEvent::SymptomAnalysisResult {
            analysis,
            session_id: session.id().to_string(),
        },
        None => {
            warn!(
                "relay: session {} analysis reply did not match the schema",
                session.id()
            );
            ServerEvent::Error { message: TECHNICAL_ERROR.to_string() }
        }
    }
}

fn analysis_prompt(symptoms: &serde_json::Value) -> String {
    format!(
        "Analyse ces symptômes et réponds UNIQUEMENT avec un objet JSON valide au format exact:\n\
         {{\"urgency\": <1-5>, \"questions\": [\"...\"], \"recommendations\": \"...\", \"specialists\": [\"...\"]}}\n\
         urgency: 1 = bénin, 5 = urgence vitale.\n\
         Symptômes rapportés: {}",
        symptoms
    )
}

/// The model sometimes wraps its JSON in markdown fences; strip them before
/// parsing against the fixed schema.
fn parse_symptom_report(raw: &str) -> Option<SymptomReport> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(inner).ok()
}
