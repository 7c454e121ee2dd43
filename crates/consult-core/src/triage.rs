//! Urgency triage: keyword scan over consultation text.
//!
//! Ordered check: urgent keywords first, then priority keywords, otherwise
//! NORMAL. Matching is case-insensitive substring search. The relay runs it
//! on each assistant reply and tags the response with the result.

use serde::{Deserialize, Serialize};

/// Coarse triage label attached to relay replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrgencyLevel {
    /// Consultation immédiate (SAMU: 15).
    #[serde(rename = "URGENT")]
    Urgent,
    /// Consultation dans 24-48h.
    #[serde(rename = "PRIORITAIRE")]
    Prioritaire,
    /// Consultation dans la semaine.
    #[serde(rename = "NORMAL")]
    Normal,
}

const URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "douleur thoracique",
    "difficulté à respirer",
    "perte de conscience",
    "hémorragie",
    "samu",
    "15",
];

const PRIORITY_KEYWORDS: &[&str] = &[
    "fièvre élevée",
    "douleur intense",
    "consultation rapide",
];

/// Classify one message. Deterministic: the urgent list always wins
/// over the priority list.
pub fn detect_urgency(message: &str) -> UrgencyLevel {
    let lower = message.to_lowercase();
    if URGENT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        UrgencyLevel::Urgent
    } else if PRIORITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        UrgencyLevel::Prioritaire
    } else {
        UrgencyLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samu_is_urgent() {
        assert_eq!(
            detect_urgency("Appelez le SAMU sans attendre."),
            UrgencyLevel::Urgent
        );
    }

    #[test]
    fn high_fever_without_urgent_keyword_is_priority() {
        assert_eq!(
            detect_urgency("Une fièvre élevée doit être surveillée de près."),
            UrgencyLevel::Prioritaire
        );
    }

    #[test]
    fn plain_advice_is_normal() {
        assert_eq!(
            detect_urgency("Reposez-vous et hydratez-vous bien."),
            UrgencyLevel::Normal
        );
    }

    #[test]
    fn urgent_wins_over_priority() {
        assert_eq!(
            detect_urgency("Douleur intense et douleur thoracique : consultez."),
            UrgencyLevel::Urgent
        );
    }

    #[test]
    fn wire_labels_are_french_uppercase() {
        assert_eq!(
            serde_json::to_string(&UrgencyLevel::Prioritaire).unwrap(),
            "\"PRIORITAIRE\""
        );
    }
}
