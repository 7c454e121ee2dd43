//! WebSocket reply source.
//!
//! When a relay endpoint is reachable it is authoritative: every committed
//! transcript goes over the wire as a `user_message` and the assistant
//! speaks whatever `ai_response` comes back. The local reasoner only serves
//! calls that never connected.

use crate::controller::ReplySource;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use consult_core::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub struct RelayLink {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session_id: Option<String>,
}

impl RelayLink {
    /// Connect to a relay, e.g. `ws://localhost:8081/medical-chat`.
    pub async fn connect(url: &str) -> VoiceResult<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| VoiceError::Transport(format!("relay connect failed: {}", e)))?;
        info!("relay: connected to {}", url);
        Ok(Self { ws, session_id: None })
    }

    /// Session id assigned by the relay, once the first reply has arrived.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[async_trait]
impl ReplySource for RelayLink {
    async fn respond(&mut self, transcript: &str) -> VoiceResult<String> {
        let event = ClientEvent::UserMessage { message: transcript.to_string() };
        let payload = serde_json::to_string(&event)
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        self.ws
            .send(Message::Text(payload))
            .await
            .map_err(|e| VoiceError::Transport(format!("relay send failed: {}", e)))?;

        while let Some(frame) = self.ws.next().await {
            let frame = frame.map_err(|e| VoiceError::Transport(format!("relay read failed: {}", e)))?;
            let text = match frame {
                Message::Text(t) => t,
                Message::Close(_) => {
                    return Err(VoiceError::Transport("relay closed the connection".to_string()))
                }
                other => {
                    debug!("relay: ignoring non-text frame {:?}", other);
                    continue;
                }
            };

            match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::AiResponse { message, session_id, .. }) => {
                    self.session_id.get_or_insert(session_id);
                    return Ok(message);
                }
                Ok(ServerEvent::Error { message }) => {
                    return Err(VoiceError::Transport(format!("relay error: {}", message)))
                }
                Ok(other) => {
                    debug!("relay: out-of-band event {:?}", other);
                }
                Err(e) => {
                    warn!("relay: unparseable frame dropped: {}", e);
                }
            }
        }

        Err(VoiceError::Transport("relay stream ended".to_string()))
    }
}
