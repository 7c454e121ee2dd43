//! Error types for the voice consultation call side.

use thiserror::Error;

/// Result type alias for call-side operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the capture, recognition, synthesis, and call
/// control layers. Fatal variants end a capability, not the process.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Permission denied or hardware missing. Fatal to the capability that
    /// needed the device; the call continues degraded.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Recoverable recognizer failure; retried once after a fixed backoff.
    #[error("recognizer error (transient): {0}")]
    RecognizerTransient(String),

    /// Permission/service denial. Listening is disabled for the rest of the
    /// call.
    #[error("recognizer error (fatal): {0}")]
    RecognizerFatal(String),

    /// Synthesis failure; logged and treated as immediate completion so the
    /// state machine never sticks in Speaking.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("speech-to-text error: {0}")]
    Stt(String),

    #[error("silence detection error: {0}")]
    Vad(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}
