//! Assembly of a live call from the real device stack.
//!
//! Wires capture, the recognition pipeline, and the playback thread behind
//! the controller's `SpeechPort` seam, bridges their event channels into the
//! controller's single event stream, and posts `MediaReady` once everything
//! is acquired.

use crate::capture::{CaptureAdapter, CaptureConfig, MediaTracks};
use crate::controller::{CallConfig, CallController, CallEvent, CallHandle, ReplySource, SpeechPort};
use crate::error::VoiceResult;
use crate::recognizer::{PipelineRecognizer, RecognizerEvent, RecognizerPort};
use crate::stt::SttBackend;
use crate::synthesis::{Speaker, SpeakerEvent, TtsBackend};
use crate::vad::VadConfig;
use tokio::sync::mpsc;

/// Full configuration for one call.
#[derive(Debug, Clone, Default)]
pub struct CallSetup {
    pub capture: CaptureConfig,
    pub vad: VadConfig,
    pub call: CallConfig,
}

/// `SpeechPort` over the real speaker, recognizer, and media tracks.
pub struct DeviceSpeechPort {
    speaker: Speaker,
    recognizer: PipelineRecognizer,
    tracks: MediaTracks,
}

impl SpeechPort for DeviceSpeechPort {
    fn speak(&mut self, text: &str) -> VoiceResult<u64> {
        self.speaker.speak(text)
    }

    fn cancel_speech(&mut self) {
        self.speaker.cancel();
    }

    fn start_listening(&mut self) -> VoiceResult<()> {
        self.recognizer.start_listening()
    }

    fn stop_listening(&mut self) {
        self.recognizer.stop_listening();
    }

    fn set_muted(&mut self, muted: bool) {
        self.tracks.audio.set_enabled(!muted);
    }

    fn set_video(&mut self, enabled: bool) {
        if let Some(video) = &self.tracks.video {
            video.set_enabled(enabled);
        }
    }
}

/// Open the devices and assemble a ready-to-run call.
///
/// Returns the controller, the event stream to feed into
/// [`CallController::run`], and a remote-control handle. `MediaReady` is
/// already queued, so running the controller speaks the greeting first.
pub fn start_call(
    setup: CallSetup,
    stt: Box<dyn SttBackend>,
    tts: Box<dyn TtsBackend>,
    reply: Box<dyn ReplySource>,
) -> VoiceResult<(CallController, mpsc::UnboundedReceiver<CallEvent>, CallHandle)> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let (tracks, chunk_rx) = CaptureAdapter::new(setup.capture).open()?;

    let (speaker_tx, mut speaker_rx) = mpsc::unbounded_channel();
    let speaker = Speaker::start(tts, speaker_tx)?;

    let (rec_tx, mut rec_rx) = mpsc::unbounded_channel();
    let recognizer = PipelineRecognizer::start(chunk_rx, setup.vad, stt, rec_tx)?;

    let bridge = event_tx.clone();
    tokio::spawn(async move {
        while let Some(SpeakerEvent::Finished { generation }) = speaker_rx.recv().await {
            if bridge.send(CallEvent::SpeakingDone(generation)).is_err() {
                break;
            }
        }
    });

    let bridge = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = rec_rx.recv().await {
            let mapped = match event {
                RecognizerEvent::Transcript(t) => CallEvent::Transcript(t),
                RecognizerEvent::Ended => CallEvent::RecognizerEnded,
                RecognizerEvent::Failed(f) => CallEvent::RecognizerFailed(f),
            };
            if bridge.send(mapped).is_err() {
                break;
            }
        }
    });

    let port = DeviceSpeechPort { speaker, recognizer, tracks };
    let mut controller = CallController::new(setup.call, Box::new(port), reply, event_tx.clone());
    let handle = controller.handle();
    controller.start()?;
    let _ = event_tx.send(CallEvent::MediaReady);

    Ok((controller, event_rx, handle))
}
