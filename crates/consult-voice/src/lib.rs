//! Voice consultation call side: capture, recognition, synthesis, and the
//! turn-taking state machine that ties them into one assisted call.
//!
//! A call runs as a single event loop ([`controller::CallController`])
//! owning exclusive media tracks ([`capture`]), a VAD-gated recognition
//! pipeline ([`recognizer`]), and a playback thread ([`synthesis`]).
//! Replies come from a connected relay ([`relay_link`]) when one is
//! reachable, otherwise from the offline symptom logic ([`reasoner`]).

pub mod call;
pub mod capture;
pub mod controller;
pub mod error;
pub mod reasoner;
pub mod recognizer;
pub mod relay_link;
pub mod stt;
pub mod synthesis;
pub mod vad;

pub use call::{start_call, CallSetup, DeviceSpeechPort};
pub use capture::{AudioChunk, CaptureAdapter, CaptureConfig, MediaTracks};
pub use controller::{
    CallConfig, CallController, CallEvent, CallHandle, CallPhase, ReplySource, SpeechPort,
};
pub use error::{VoiceError, VoiceResult};
pub use reasoner::{ConversationContext, LocalReasoner, Stage, Symptom};
pub use recognizer::{
    PipelineRecognizer, RecognizerEvent, RecognizerFailure, RecognizerPort, TranscriptEvent,
};
pub use relay_link::RelayLink;
pub use stt::{ScriptedStt, SttBackend, WhisperApiStt};
pub use synthesis::{RemoteTts, SilentTts, Speaker, SpeakerEvent, TtsBackend};
pub use vad::{VadConfig, VadDetector};
