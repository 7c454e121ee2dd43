//! Remote chat-completion client (Mistral `/v1/chat/completions`).
//!
//! The relay never talks to the API directly; it goes through the
//! [`CompletionBackend`] trait so session handling can be exercised with a
//! stub backend in tests. The production implementation is [`MistralClient`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MISTRAL_API_BASE: &str = "https://api.mistral.ai/v1";

/// One message in an OpenAI-compatible chat request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Errors from the completion boundary. All of them are caught at the relay
/// and converted to user-visible messages; none crosses the transport raw.
#[derive(thiserror::Error, Debug)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Http(String),

    #[error("completion API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("completion response parse failed: {0}")]
    Parse(String),

    #[error("completion response contained no choices")]
    Empty,
}

/// Seam between the relay and the remote model.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send the full ordered message list and return the assistant reply text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CompletionError>;
}

/// Production backend for the Mistral chat-completion API.
pub struct MistralClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl MistralClient {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { api_key: api_key.trim().to_string(), model, client }
    }

    /// Build from `MISTRAL_API_KEY` / `MISTRAL_MODEL`. Returns `None` when no
    /// key is configured so the caller can refuse to start in live mode.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("MISTRAL_API_KEY").ok()?.trim().to_string();
        if key.is_empty() {
            return None;
        }
        let model = std::env::var("MISTRAL_MODEL")
            .unwrap_or_else(|_| "mistral-large-latest".to_string());
        Some(Self::new(key, model))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl CompletionBackend for MistralClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", MISTRAL_API_BASE);
        let body = ChatRequest { model: &self.model, messages, temperature, max_tokens };
        tracing::debug!(
            "completion: {} message(s) to {} (temp {})",
            messages.len(),
            self.model,
            temperature
        );

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Http(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| CompletionError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(CompletionError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_openai_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let req = ChatRequest {
            model: "mistral-large-latest",
            messages: &messages,
            temperature: 0.3,
            max_tokens: 500,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "mistral-large-latest");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 500);
    }

    #[test]
    fn response_parses_first_choice() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Bonjour"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "Bonjour");
    }
}
