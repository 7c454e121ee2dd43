//! Per-connection conversation record.
//!
//! One `Session` per transport connection, owned exclusively by that
//! connection's task — no shared map, no cross-session state. History is
//! append-only and dropped with the task when the transport closes.

use chrono::{DateTime, Utc};

use crate::completion::ChatMessage;
use crate::triage::UrgencyLevel;

/// Fixed system prompt sent ahead of the history on every completion call.
pub const SYSTEM_PROMPT: &str = "Tu es un assistant médical IA français spécialisé dans l'évaluation des symptômes et l'orientation médicale.

RÈGLES IMPORTANTES:
- Réponds TOUJOURS en français
- Sois empathique et professionnel
- Ne pose JAMAIS de diagnostic définitif
- Oriente vers une consultation médicale quand nécessaire
- Pose des questions pertinentes pour évaluer les symptômes
- Utilise une échelle de 1 à 10 pour l'intensité des symptômes

PROCESSUS:
1. Écoute les symptômes
2. Pose des questions de précision
3. Évalue le niveau d'urgence
4. Recommande les actions appropriées

NIVEAUX D'URGENCE:
- URGENT: Consultation immédiate (SAMU: 15)
- PRIORITAIRE: Consultation dans 24-48h
- NORMAL: Consultation dans la semaine
- SURVEILLANCE: Auto-soins avec suivi";

/// Speaker of an [`Utterance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One conversation turn. Immutable once appended.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub role: Role,
    pub content: String,
    pub urgency: Option<UrgencyLevel>,
    pub timestamp: DateTime<Utc>,
}

/// Allocate an opaque session token, unique per connection.
pub fn new_session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

/// One consultation conversation, spanning one connection's lifetime.
#[derive(Debug)]
pub struct Session {
    id: String,
    history: Vec<Utterance>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self { id, history: Vec::new(), created_at: Utc::now() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn history(&self) -> &[Utterance] {
        &self.history
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(Utterance {
            role: Role::User,
            content: content.into(),
            urgency: None,
            timestamp: Utc::now(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, urgency: Option<UrgencyLevel>) {
        self.history.push(Utterance {
            role: Role::Assistant,
            content: content.into(),
            urgency,
            timestamp: Utc::now(),
        });
    }

    /// Compose the completion request: the fixed system prompt followed by the
    /// full history in conversation order. No reordering, no drop.
    pub fn completion_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        for utterance in &self.history {
            messages.push(ChatMessage {
                role: utterance.role.as_str().to_string(),
                content: utterance.content.clone(),
            });
        }
        messages
    }
}
