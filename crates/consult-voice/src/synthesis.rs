//! Text-to-speech synthesis and playback.
//!
//! The rodio sink is not Send on every platform, so `Speaker` runs it on a
//! dedicated thread behind a command channel. `speak` is last-call-wins: any
//! in-flight utterance is cancelled before the new one starts, and exactly
//! one `Finished` event is reported per surviving generation. A synthesis
//! failure is logged and reported as immediate completion so the call state
//! machine never sticks in Speaking.

use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Backend that turns text into audio bytes (WAV/MP3).
pub trait TtsBackend: Send + Sync {
    /// Synthesize text. An empty result skips playback but still completes.
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;

    /// Voices this backend can speak with. The call controller waits for a
    /// non-empty enumeration before greeting.
    fn voices(&self) -> Vec<String> {
        vec!["default".to_string()]
    }
}

/// Placeholder backend: synthesizes nothing. Playback completes immediately,
/// which keeps the turn cycle running in tests and keyless setups.
#[derive(Debug, Default)]
pub struct SilentTts;

impl TtsBackend for SilentTts {
    fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Production TTS: OpenAI-compatible `/audio/speech`.
/// Uses `TTS_API_URL` (default https://api.openai.com/v1), `TTS_API_KEY`,
/// `TTS_MODEL` (default tts-1), and `TTS_VOICE` (default alloy).
#[derive(Debug, Clone)]
pub struct RemoteTts {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    client: reqwest::blocking::Client,
}

impl RemoteTts {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("TTS_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .map_err(|_| VoiceError::Config("TTS requires TTS_API_KEY".to_string()))?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "alloy".to_string());
        Self::new(base_url, api_key, model, voice)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }
}

impl TtsBackend for RemoteTts {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Synthesis(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn voices(&self) -> Vec<String> {
        ["alloy", "echo", "fable", "onyx", "nova", "shimmer"]
            .iter()
            .map(|v| v.to_string())
            .collect()
    }
}

/// Completion signals from the playback thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerEvent {
    /// The utterance with this generation finished (or failed and was
    /// treated as finished). Cancelled generations never report.
    Finished { generation: u64 },
}

enum SpeakerCommand {
    Speak { generation: u64, text: String },
    Cancel,
    Shutdown,
}

/// Handle to the playback thread. Cloneable is deliberately not offered:
/// exactly one owner drives speech, matching the one-call-one-stream model.
pub struct Speaker {
    cmd_tx: std::sync::mpsc::Sender<SpeakerCommand>,
    generation: Arc<AtomicU64>,
    voices: Vec<String>,
}

impl Speaker {
    /// Spawn the playback thread. `event_tx` receives one `Finished` per
    /// utterance that was not superseded.
    pub fn start(
        backend: Box<dyn TtsBackend>,
        event_tx: mpsc::UnboundedSender<SpeakerEvent>,
    ) -> VoiceResult<Self> {
        let voices = backend.voices();
        if voices.is_empty() {
            return Err(VoiceError::Config("TTS backend enumerates no voices".to_string()));
        }

        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel::<SpeakerCommand>();
        std::thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || playback_loop(backend, cmd_rx, event_tx))
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        Ok(Self { cmd_tx, generation: Arc::new(AtomicU64::new(0)), voices })
    }

    /// Speak `text`, cancelling any in-flight utterance first. Returns the
    /// generation that will appear in the `Finished` event.
    pub fn speak(&self, text: &str) -> VoiceResult<u64> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cmd_tx
            .send(SpeakerCommand::Speak { generation, text: text.to_string() })
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))?;
        Ok(generation)
    }

    /// Stop playback immediately and drop the queued utterance.
    pub fn cancel(&self) {
        let _ = self.cmd_tx.send(SpeakerCommand::Cancel);
    }

    pub fn voices(&self) -> &[String] {
        &self.voices
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SpeakerCommand::Shutdown);
    }
}

fn playback_loop(
    backend: Box<dyn TtsBackend>,
    cmd_rx: std::sync::mpsc::Receiver<SpeakerCommand>,
    event_tx: mpsc::UnboundedSender<SpeakerEvent>,
) {
    let output = OutputStream::try_default();
    let (_stream, sink) = match output {
        Ok((stream, handle)) => match Sink::try_new(&handle) {
            Ok(sink) => (Some(stream), Some(sink)),
            Err(e) => {
                warn!("speaker: sink init failed: {} (speaking completes silently)", e);
                (None, None)
            }
        },
        Err(e) => {
            warn!("speaker: no output device: {} (speaking completes silently)", e);
            (None, None)
        }
    };

    info!("speaker: playback thread ready");
    let mut pending: Option<SpeakerCommand> = None;

    loop {
        let cmd = match pending.take() {
            Some(c) => c,
            None => match cmd_rx.recv() {
                Ok(c) => c,
                Err(_) => break,
            },
        };

        match cmd {
            SpeakerCommand::Shutdown => break,
            SpeakerCommand::Cancel => {
                if let Some(ref sink) = sink {
                    sink.stop();
                }
            }
            SpeakerCommand::Speak { generation, text } => {
                if let Some(ref sink) = sink {
                    sink.stop();
                }

                match backend.synthesize(&text) {
                    Ok(bytes) if !bytes.is_empty() => {
                        if let Some(ref sink) = sink {
                            match rodio::Decoder::new(Cursor::new(bytes)) {
                                Ok(source) => sink.append(source.convert_samples::<f32>()),
                                Err(e) => warn!("speaker: decode failed: {}", e),
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Treated as immediate completion: the call must not
                        // hang in Speaking because one utterance failed.
                        warn!("speaker: synthesis failed: {}", e);
                    }
                }

                // Wait for the sink to drain, or for a superseding command.
                loop {
                    let playing = sink.as_ref().map(|s| !s.empty()).unwrap_or(false);
                    if !playing {
                        let _ = event_tx.send(SpeakerEvent::Finished { generation });
                        break;
                    }
                    match cmd_rx.recv_timeout(Duration::from_millis(50)) {
                        Ok(next) => {
                            // Superseded: this generation never reports.
                            pending = Some(next);
                            break;
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
        }
    }
}
