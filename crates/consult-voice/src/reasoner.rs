//! Offline consultation logic.
//!
//! When no relay is connected the call still holds a useful conversation:
//! transcripts are mined for symptom keywords, severity, and duration, a few
//! follow-up questions fill the gaps, and the collected picture yields a
//! triage recommendation. The question order is drawn from an injected RNG
//! so tests can pin it down.

use crate::controller::ReplySource;
use crate::error::VoiceResult;
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

/// Recognized symptom, keyed the way the remote analysis schema names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symptom {
    Headache,
    Fever,
    Cough,
    Pain,
    Fatigue,
    Nausea,
    Dizziness,
    ShortnessOfBreath,
    ChestPain,
}

impl Symptom {
    pub fn as_str(&self) -> &'static str {
        match self {
            Symptom::Headache => "headache",
            Symptom::Fever => "fever",
            Symptom::Cough => "cough",
            Symptom::Pain => "pain",
            Symptom::Fatigue => "fatigue",
            Symptom::Nausea => "nausea",
            Symptom::Dizziness => "dizziness",
            Symptom::ShortnessOfBreath => "shortness_of_breath",
            Symptom::ChestPain => "chest_pain",
        }
    }
}

const SYMPTOM_KEYWORDS: &[(Symptom, &[&str])] = &[
    (Symptom::Headache, &["headache", "head hurt", "head pain", "migraine"]),
    (Symptom::Fever, &["fever", "temperature", "hot", "chills", "shivering"]),
    (Symptom::Cough, &["cough", "coughing", "throat", "sore throat"]),
    (Symptom::Pain, &["pain", "hurt", "ache", "aching", "sore"]),
    (Symptom::Fatigue, &["tired", "fatigue", "exhausted", "weak", "weakness"]),
    (Symptom::Nausea, &["nausea", "nauseous", "sick", "vomit", "throw up"]),
    (Symptom::Dizziness, &["dizzy", "dizziness", "lightheaded", "faint"]),
    (Symptom::ShortnessOfBreath, &["breath", "breathing", "breathe", "air"]),
    (Symptom::ChestPain, &["chest pain", "chest hurt", "heart"]),
];

const FOLLOW_UP_QUESTIONS: &[&str] = &[
    "What makes your symptoms better or worse?",
    "Have you taken any medication for this?",
    "Any other symptoms you're experiencing?",
    "Does this interfere with your daily activities?",
    "Have you had similar episodes before?",
];

/// How far the consultation has progressed. Terminal at `Assessment`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Greeting,
    SymptomInquiry,
    FollowUp,
    Assessment,
}

/// Everything gathered so far in this consultation.
#[derive(Debug, Default)]
pub struct ConversationContext {
    pub stage: Stage,
    pub symptoms: BTreeSet<Symptom>,
    /// 1-10, set once from the first number the user mentions.
    pub severity: Option<u8>,
    pub duration: Option<String>,
    asked: Vec<usize>,
}

impl ConversationContext {
    /// Mine one transcript for symptoms, severity, and duration.
    pub fn absorb(&mut self, transcript: &str) {
        let lower = transcript.to_lowercase();

        for (symptom, keywords) in SYMPTOM_KEYWORDS {
            if keywords.iter().any(|k| lower.contains(k)) {
                self.symptoms.insert(*symptom);
            }
        }

        if self.severity.is_none() {
            if let Some(n) = extract_severity(&lower) {
                self.severity = Some(n);
            }
        }

        if self.duration.is_none() {
            self.duration = extract_duration(&lower);
        }

        debug!(
            "context: {} symptom(s), severity {:?}, duration {:?}",
            self.symptoms.len(),
            self.severity,
            self.duration
        );
    }

    fn ready_for_assessment(&self) -> bool {
        (!self.symptoms.is_empty() && self.severity.is_some() && self.duration.is_some())
            || self.asked.len() >= FOLLOW_UP_QUESTIONS.len()
    }

    fn next_question(&mut self, rng: &mut impl Rng) -> Option<&'static str> {
        let remaining: Vec<usize> =
            (0..FOLLOW_UP_QUESTIONS.len()).filter(|i| !self.asked.contains(i)).collect();
        if remaining.is_empty() {
            return None;
        }
        let pick = remaining[rng.gen_range(0..remaining.len())];
        self.asked.push(pick);
        Some(FOLLOW_UP_QUESTIONS[pick])
    }

    fn assessment(&self) -> String {
        let severity = self.severity.unwrap_or(0);
        let urgent = self.symptoms.contains(&Symptom::ChestPain) || severity >= 8;
        let same_day = self.symptoms.contains(&Symptom::Fever)
            && self.symptoms.contains(&Symptom::ShortnessOfBreath);

        if urgent {
            "Based on your symptoms, I recommend seeking immediate medical attention. Please consider visiting an emergency room or calling emergency services.".to_string()
        } else if same_day {
            "The combination of fever and breathing difficulties warrants prompt medical evaluation. I'd suggest contacting your doctor today or visiting urgent care.".to_string()
        } else if severity >= 6 {
            "Your symptom severity suggests you should see a healthcare provider within the next day or two. In the meantime, rest and stay hydrated.".to_string()
        } else {
            "Your symptoms seem manageable for now. Monitor them closely, and if they worsen or persist beyond a few days, consider seeing your doctor.".to_string()
        }
    }
}

fn extract_severity(lower: &str) -> Option<u8> {
    // First standalone 1-10 in the utterance.
    let re = Regex::new(r"\b(10|[1-9])\b").ok()?;
    re.captures(lower)?.get(1)?.as_str().parse().ok()
}

fn extract_duration(lower: &str) -> Option<String> {
    if lower.contains("yesterday") {
        return Some("since yesterday".to_string());
    }
    let re = Regex::new(r"(few|several|couple of|\d+)\s*(hour|day|week|month)s?").ok()?;
    let caps = re.captures(lower)?;
    Some(format!("{} {}(s)", &caps[1], &caps[2]))
}

/// `ReplySource` that answers from the local context instead of a relay.
pub struct LocalReasoner<R: Rng + Send> {
    context: ConversationContext,
    rng: R,
}

impl<R: Rng + Send> LocalReasoner<R> {
    pub fn new(rng: R) -> Self {
        Self { context: ConversationContext::default(), rng }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }
}

#[async_trait]
impl<R: Rng + Send> ReplySource for LocalReasoner<R> {
    async fn respond(&mut self, transcript: &str) -> VoiceResult<String> {
        self.context.absorb(transcript);

        if self.context.symptoms.is_empty() && self.context.severity.is_none() {
            self.context.stage = Stage::SymptomInquiry;
            return Ok("I understand. Could you tell me a bit more about what you're feeling?"
                .to_string());
        }

        if self.context.ready_for_assessment() {
            self.context.stage = Stage::Assessment;
            return Ok(self.context.assessment());
        }

        match self.context.next_question(&mut self.rng) {
            Some(q) => {
                self.context.stage = Stage::FollowUp;
                Ok(q.to_string())
            }
            None => {
                self.context.stage = Stage::Assessment;
                Ok(self.context.assessment())
            }
        }
    }
}
