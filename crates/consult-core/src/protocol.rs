//! Typed JSON events carried over the transport boundary.
//!
//! One persistent duplex channel per active call. The event set is closed:
//! unknown client kinds deserialize to [`ClientEvent::Unknown`] and are
//! logged and ignored by the relay — never answered with an error.

use serde::{Deserialize, Serialize};

use crate::triage::UrgencyLevel;

/// Client → relay events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    UserMessage {
        message: String,
    },
    SymptomAnalysis {
        symptoms: serde_json::Value,
    },
    ImageAnalysis {
        #[serde(rename = "imageData")]
        image_data: String,
        prompt: String,
    },
    /// Any event kind outside the closed set.
    #[serde(other)]
    Unknown,
}

/// Relay → client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AiResponse {
        message: String,
        #[serde(rename = "urgencyLevel", skip_serializing_if = "Option::is_none")]
        urgency_level: Option<UrgencyLevel>,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    SymptomAnalysisResult {
        analysis: SymptomReport,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    ImageAnalysisResult {
        message: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Error {
        message: String,
    },
}

/// Structured reply expected from the symptom-analysis prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomReport {
    /// 1 (benign) to 5 (emergency).
    pub urgency: u8,
    pub questions: Vec<String>,
    pub recommendations: String,
    pub specialists: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_round_trips() {
        let raw = r#"{"type":"user_message","message":"j'ai mal à la tête"}"#;
        let ev: ClientEvent = serde_json::from_str(raw).unwrap();
        match ev {
            ClientEvent::UserMessage { message } => assert_eq!(message, "j'ai mal à la tête"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn image_analysis_uses_camel_case_field() {
        let raw = r#"{"type":"image_analysis","imageData":"aGVsbG8=","prompt":"regarde"}"#;
        let ev: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(ev, ClientEvent::ImageAnalysis { .. }));
    }

    #[test]
    fn unknown_kind_maps_to_unknown_variant() {
        let raw = r#"{"type":"telemetry_ping","payload":{}}"#;
        let ev: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(ev, ClientEvent::Unknown));
    }

    #[test]
    fn ai_response_wire_shape() {
        let ev = ServerEvent::AiResponse {
            message: "Bonjour".into(),
            urgency_level: Some(UrgencyLevel::Normal),
            session_id: "session_x".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "ai_response");
        assert_eq!(json["urgencyLevel"], "NORMAL");
        assert_eq!(json["sessionId"], "session_x");
    }

    #[test]
    fn absent_urgency_is_omitted() {
        let ev = ServerEvent::AiResponse {
            message: "m".into(),
            urgency_level: None,
            session_id: "s".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("urgencyLevel").is_none());
    }

    #[test]
    fn symptom_report_parses_fixed_schema() {
        let raw = r#"{"urgency":3,"questions":["Depuis quand ?"],"recommendations":"Consulter sous 48h","specialists":["généraliste"]}"#;
        let report: SymptomReport = serde_json::from_str(raw).unwrap();
        assert_eq!(report.urgency, 3);
        assert_eq!(report.questions.len(), 1);
    }
}
