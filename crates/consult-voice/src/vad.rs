//! Voice activity detection using WebRTC VAD.
//!
//! Drives the turn-taking silence detector: each 30ms chunk is classified as
//! speech or silence, and the recognizer pipeline turns silence runs into
//! turn boundaries.

use crate::error::{VoiceError, VoiceResult};
use tracing::debug;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Configuration for the speech/silence classifier.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Must be 8000, 16000, 32000, or 48000 Hz.
    pub sample_rate: u32,
    /// Aggressiveness 0-3 (3 = most aggressive).
    pub mode: u8,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self { sample_rate: 16000, mode: 2 }
    }
}

/// Per-chunk speech classifier. Constructed up front, then moved onto the
/// pipeline thread and used only there.
pub struct VadDetector {
    vad: Vad,
    chunk_size: usize,
    sample_rate: u32,
}

// SAFETY: `Vad` is !Send only because it holds a raw pointer to its fvad
// state, which has no thread affinity. The detector is moved onto the
// pipeline thread once and never used concurrently.
unsafe impl Send for VadDetector {}

impl VadDetector {
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        if !matches!(config.sample_rate, 8000 | 16000 | 32000 | 48000) {
            return Err(VoiceError::Config(format!(
                "WebRTC VAD only supports 8000/16000/32000/48000 Hz, got {}",
                config.sample_rate
            )));
        }
        if config.mode > 3 {
            return Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", config.mode)));
        }

        // 30ms frames are the largest WebRTC VAD accepts.
        let chunk_size = (config.sample_rate as f32 * 0.03) as usize;

        let mut vad = Vad::new();
        vad.set_mode(vad_mode(config.mode));
        vad.set_sample_rate(vad_rate(config.sample_rate));

        Ok(Self { vad, chunk_size, sample_rate: config.sample_rate })
    }

    /// Classify one chunk. The chunk must be exactly `chunk_size` samples.
    pub fn is_speech(&mut self, audio: &[f32]) -> VoiceResult<bool> {
        if audio.len() != self.chunk_size {
            return Err(VoiceError::Vad(format!(
                "expected {} samples, got {}",
                self.chunk_size,
                audio.len()
            )));
        }

        let audio_i16: Vec<i16> = audio
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        let speech = self
            .vad
            .is_voice_segment(&audio_i16)
            .map_err(|e| VoiceError::Vad(format!("VAD processing failed: {:?}", e)))?;

        debug!("VAD: {}", if speech { "speech" } else { "silence" });
        Ok(speech)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn vad_mode(mode: u8) -> VadMode {
    match mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    }
}

fn vad_rate(rate: u32) -> SampleRate {
    match rate {
        8000 => SampleRate::Rate8kHz,
        16000 => SampleRate::Rate16kHz,
        32000 => SampleRate::Rate32kHz,
        _ => SampleRate::Rate48kHz,
    }
}
