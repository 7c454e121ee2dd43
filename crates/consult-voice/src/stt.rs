//! Speech-to-text backends for the recognizer pipeline.
//!
//! `SttBackend` converts one committed turn of PCM into text. The production
//! backend posts WAV bytes to an OpenAI-compatible transcription endpoint;
//! `ScriptedStt` feeds fixed transcripts to tests.

use crate::error::{VoiceError, VoiceResult};
use std::io::Write;

/// Backend for converting a turn's PCM into text.
pub trait SttBackend: Send + Sync {
    /// Transcribe one turn (mono f32 at `sample_rate`). Empty string means
    /// nothing was recognized.
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let file_len = 44u32 + data_len as u32;

    let mut buf = Vec::with_capacity(44 + data_len);
    buf.write_all(b"RIFF").unwrap();
    buf.write_all(&(file_len - 8).to_le_bytes()).unwrap();
    buf.write_all(b"WAVE").unwrap();
    buf.write_all(b"fmt ").unwrap();
    buf.write_all(&16u32.to_le_bytes()).unwrap();
    buf.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
    buf.write_all(&1u16.to_le_bytes()).unwrap(); // mono
    buf.write_all(&sample_rate.to_le_bytes()).unwrap();
    buf.write_all(&(sample_rate * 2).to_le_bytes()).unwrap();
    buf.write_all(&2u16.to_le_bytes()).unwrap();
    buf.write_all(&16u16.to_le_bytes()).unwrap();
    buf.write_all(b"data").unwrap();
    buf.write_all(&(data_len as u32).to_le_bytes()).unwrap();
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.write_all(&i.to_le_bytes()).unwrap();
    }
    buf
}

/// Scripted STT for tests: pops transcripts from a fixed list.
#[derive(Debug, Default)]
pub struct ScriptedStt {
    responses: std::sync::Mutex<Vec<String>>,
}

impl ScriptedStt {
    pub fn new(responses: Vec<String>) -> Self {
        let mut rev = responses;
        rev.reverse();
        Self { responses: std::sync::Mutex::new(rev) }
    }
}

impl SttBackend for ScriptedStt {
    fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> VoiceResult<String> {
        Ok(self
            .responses
            .lock()
            .map_err(|e| VoiceError::Stt(format!("scripted STT lock poisoned: {}", e)))?
            .pop()
            .unwrap_or_default())
    }
}

/// Production STT: OpenAI-compatible transcription API.
/// Uses `STT_API_URL` (default https://api.openai.com/v1), `STT_API_KEY`,
/// and `STT_MODEL` (default whisper-1). Runs on the pipeline thread, so the
/// blocking client is fine.
#[derive(Debug, Clone)]
pub struct WhisperApiStt {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl WhisperApiStt {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .map_err(|_| VoiceError::Config("STT requires STT_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

impl SttBackend for WhisperApiStt {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(samples, sample_rate);
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("turn.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_valid() {
        let wav = pcm_f32_to_wav(&[0.0, 0.5, -0.5], 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 6);
    }

    #[test]
    fn scripted_stt_pops_in_order() {
        let stt = ScriptedStt::new(vec!["first".into(), "second".into()]);
        assert_eq!(stt.transcribe(&[], 16000).unwrap(), "first");
        assert_eq!(stt.transcribe(&[], 16000).unwrap(), "second");
        assert_eq!(stt.transcribe(&[], 16000).unwrap(), "");
    }
}
