//! # Consult Core — shared foundation for the voice consultation system
//!
//! Everything both sides of the transport need: the wire protocol spoken
//! between the call controller and the session relay, the per-connection
//! conversation record, the urgency triage scan, the Mistral completion
//! client, and env-driven configuration.

pub mod completion;
pub mod config;
pub mod protocol;
pub mod session;
pub mod triage;

pub use completion::{ChatMessage, CompletionBackend, CompletionError, MistralClient};
pub use config::CoreConfig;
pub use protocol::{ClientEvent, ServerEvent, SymptomReport};
pub use session::{new_session_id, Role, Session, Utterance, SYSTEM_PROMPT};
pub use triage::{detect_urgency, UrgencyLevel};
