//! Continuous speech recognition pipeline.
//!
//! Consumes captured audio chunks, classifies them with the VAD, groups
//! speech runs into turns using a silence gap, and hands each committed turn
//! to the STT backend. Interim events fire on speech onset and continuation
//! so the call controller can re-arm its reply timer; only the committed
//! turn carries text.

use crate::error::{VoiceError, VoiceResult};
use crate::capture::AudioChunk;
use crate::stt::SttBackend;
use crate::vad::{VadConfig, VadDetector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Silence run that commits a turn.
const SILENCE_GAP_MS: u64 = 800;
/// Shorter speech runs are discarded as noise.
const MIN_SPEECH_MS: u64 = 200;
/// How often a continuing speech run re-reports an interim event.
const INTERIM_EVERY_MS: u64 = 500;

/// One recognition result. Interim events carry no text; they exist to show
/// the user is (still) talking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

/// How a recognizer failure should be handled upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerFailure {
    /// Worth one retry after a short backoff.
    Transient(String),
    /// Permission or service denial. Listening stays off for the call.
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    Transcript(TranscriptEvent),
    /// The audio source closed while we were listening.
    Ended,
    Failed(RecognizerFailure),
}

/// Seam between the call controller and whatever produces transcripts.
pub trait RecognizerPort: Send {
    /// Begin (or keep) listening. A no-op while already active.
    fn start_listening(&mut self) -> VoiceResult<()>;
    fn stop_listening(&mut self);
    fn is_active(&self) -> bool;
}

/// Production recognizer: VAD-gated turn segmentation over the capture
/// stream, one STT call per committed turn. Runs on its own thread because
/// the VAD is not Send and STT is blocking.
pub struct PipelineRecognizer {
    listening: Arc<AtomicBool>,
}

impl PipelineRecognizer {
    /// Spawn the pipeline thread. Starts paused; `start_listening` opens the
    /// gate. Events flow until the chunk source closes.
    pub fn start(
        chunk_rx: mpsc::UnboundedReceiver<AudioChunk>,
        vad_config: VadConfig,
        stt: Box<dyn SttBackend>,
        event_tx: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> VoiceResult<Self> {
        // Construct the VAD up front so config errors surface here, then
        // move it onto the thread.
        let detector = VadDetector::new(vad_config)?;
        let listening = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&listening);

        std::thread::Builder::new()
            .name("recognizer".to_string())
            .spawn(move || pipeline_loop(chunk_rx, detector, stt, event_tx, gate))
            .map_err(|e| VoiceError::Stt(e.to_string()))?;

        Ok(Self { listening })
    }
}

impl RecognizerPort for PipelineRecognizer {
    fn start_listening(&mut self) -> VoiceResult<()> {
        if !self.listening.swap(true, Ordering::SeqCst) {
            info!("recognizer: listening");
        }
        Ok(())
    }

    fn stop_listening(&mut self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            info!("recognizer: stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

struct TurnState {
    in_speech: bool,
    speech: Vec<f32>,
    speech_ms: u64,
    silence_ms: u64,
    since_interim_ms: u64,
}

impl TurnState {
    fn new() -> Self {
        Self { in_speech: false, speech: Vec::new(), speech_ms: 0, silence_ms: 0, since_interim_ms: 0 }
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.speech.clear();
        self.speech_ms = 0;
        self.silence_ms = 0;
        self.since_interim_ms = 0;
    }
}

fn pipeline_loop(
    mut chunk_rx: mpsc::UnboundedReceiver<AudioChunk>,
    mut detector: VadDetector,
    stt: Box<dyn SttBackend>,
    event_tx: mpsc::UnboundedSender<RecognizerEvent>,
    gate: Arc<AtomicBool>,
) {
    let frame = detector.chunk_size();
    let sample_rate = detector.sample_rate();
    let frame_ms = (frame as u64 * 1000) / sample_rate as u64;

    let mut pending: Vec<f32> = Vec::with_capacity(frame * 2);
    let mut turn = TurnState::new();

    while let Some(chunk) = chunk_rx.blocking_recv() {
        if !gate.load(Ordering::SeqCst) {
            pending.clear();
            turn.reset();
            continue;
        }

        pending.extend_from_slice(&chunk.samples);
        while pending.len() >= frame {
            let samples: Vec<f32> = pending.drain(..frame).collect();
            let speech = match detector.is_speech(&samples) {
                Ok(s) => s,
                Err(e) => {
                    warn!("recognizer: VAD failed: {}", e);
                    let _ = event_tx.send(RecognizerEvent::Failed(RecognizerFailure::Transient(
                        e.to_string(),
                    )));
                    turn.reset();
                    continue;
                }
            };

            if speech {
                if !turn.in_speech {
                    turn.in_speech = true;
                    turn.since_interim_ms = 0;
                    let _ = event_tx.send(RecognizerEvent::Transcript(TranscriptEvent {
                        text: String::new(),
                        is_final: false,
                    }));
                }
                turn.speech.extend_from_slice(&samples);
                turn.speech_ms += frame_ms;
                turn.silence_ms = 0;
                turn.since_interim_ms += frame_ms;
                if turn.since_interim_ms >= INTERIM_EVERY_MS {
                    turn.since_interim_ms = 0;
                    let _ = event_tx.send(RecognizerEvent::Transcript(TranscriptEvent {
                        text: String::new(),
                        is_final: false,
                    }));
                }
            } else if turn.in_speech {
                // Keep trailing silence in the buffer; STT handles context
                // better with the pause included.
                turn.speech.extend_from_slice(&samples);
                turn.silence_ms += frame_ms;
                if turn.silence_ms >= SILENCE_GAP_MS {
                    commit_turn(&mut turn, &*stt, sample_rate, &event_tx);
                }
            }
        }
    }

    debug!("recognizer: chunk source closed");
    let _ = event_tx.send(RecognizerEvent::Ended);
}

fn commit_turn(
    turn: &mut TurnState,
    stt: &dyn SttBackend,
    sample_rate: u32,
    event_tx: &mpsc::UnboundedSender<RecognizerEvent>,
) {
    if turn.speech_ms < MIN_SPEECH_MS {
        debug!("recognizer: discarding {}ms speech run as noise", turn.speech_ms);
        turn.reset();
        return;
    }

    let samples = std::mem::take(&mut turn.speech);
    turn.reset();

    match stt.transcribe(&samples, sample_rate) {
        Ok(text) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                debug!("recognizer: empty transcription, turn dropped");
                return;
            }
            info!("recognizer: turn committed ({} chars)", text.len());
            let _ = event_tx.send(RecognizerEvent::Transcript(TranscriptEvent {
                text,
                is_final: true,
            }));
        }
        Err(VoiceError::Config(msg)) => {
            let _ = event_tx.send(RecognizerEvent::Failed(RecognizerFailure::Fatal(msg)));
        }
        Err(e) => {
            warn!("recognizer: transcription failed: {}", e);
            let _ = event_tx.send(RecognizerEvent::Failed(RecognizerFailure::Transient(
                e.to_string(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::ScriptedStt;

    fn speech_frame() -> Vec<f32> {
        // Loud alternating square wave registers as speech with the VAD.
        (0..480).map(|i| if (i / 40) % 2 == 0 { 0.8 } else { -0.8 }).collect()
    }

    fn send_chunks(tx: &mpsc::UnboundedSender<AudioChunk>, frames: usize, samples_fn: impl Fn() -> Vec<f32>) {
        for _ in 0..frames {
            tx.send(AudioChunk { samples: samples_fn(), timestamp: std::time::Instant::now() })
                .unwrap();
        }
    }

    #[tokio::test]
    async fn gap_commits_turn_with_final_transcript() {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let stt = ScriptedStt::new(vec!["j'ai mal à la tête".into()]);
        let mut rec =
            PipelineRecognizer::start(chunk_rx, VadConfig::default(), Box::new(stt), event_tx)
                .unwrap();
        rec.start_listening().unwrap();

        // 600ms of speech, then 900ms of silence crosses the 800ms gap.
        send_chunks(&chunk_tx, 20, speech_frame);
        send_chunks(&chunk_tx, 30, || vec![0.0f32; 480]);
        drop(chunk_tx);

        let mut final_text = None;
        while let Some(event) = event_rx.recv().await {
            match event {
                RecognizerEvent::Transcript(t) if t.is_final => final_text = Some(t.text),
                RecognizerEvent::Transcript(t) => assert!(t.text.is_empty()),
                RecognizerEvent::Ended => break,
                RecognizerEvent::Failed(f) => panic!("unexpected failure: {:?}", f),
            }
        }
        assert_eq!(final_text.as_deref(), Some("j'ai mal à la tête"));
    }

    #[tokio::test]
    async fn short_blip_is_discarded() {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let stt = ScriptedStt::new(vec!["should never surface".into()]);
        let mut rec =
            PipelineRecognizer::start(chunk_rx, VadConfig::default(), Box::new(stt), event_tx)
                .unwrap();
        rec.start_listening().unwrap();

        // 90ms of speech is under the 200ms minimum.
        send_chunks(&chunk_tx, 3, speech_frame);
        send_chunks(&chunk_tx, 30, || vec![0.0f32; 480]);
        drop(chunk_tx);

        while let Some(event) = event_rx.recv().await {
            match event {
                RecognizerEvent::Transcript(t) => assert!(!t.is_final),
                RecognizerEvent::Ended => break,
                RecognizerEvent::Failed(f) => panic!("unexpected failure: {:?}", f),
            }
        }
    }

    #[tokio::test]
    async fn paused_recognizer_drops_audio() {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let stt = ScriptedStt::new(vec!["ignored".into()]);
        let rec =
            PipelineRecognizer::start(chunk_rx, VadConfig::default(), Box::new(stt), event_tx)
                .unwrap();
        assert!(!rec.is_active());

        send_chunks(&chunk_tx, 20, speech_frame);
        send_chunks(&chunk_tx, 30, || vec![0.0f32; 480]);
        drop(chunk_tx);

        // Gate never opened: only the Ended event arrives.
        assert_eq!(event_rx.recv().await, Some(RecognizerEvent::Ended));
        assert_eq!(event_rx.recv().await, None);
    }

    #[test]
    fn start_listening_is_idempotent() {
        let (_chunk_tx, chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let stt = ScriptedStt::default();
        let mut rec =
            PipelineRecognizer::start(chunk_rx, VadConfig::default(), Box::new(stt), event_tx)
                .unwrap();
        rec.start_listening().unwrap();
        rec.start_listening().unwrap();
        assert!(rec.is_active());
        rec.stop_listening();
        assert!(!rec.is_active());
    }
}
