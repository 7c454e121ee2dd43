//! Media capture: microphone acquisition, audio chunking, and track toggles.
//!
//! `CaptureAdapter::open` acquires the devices once per call; mute and video
//! toggles flip an enabled flag on the already-open tracks without ever
//! reacquiring hardware. A denied permission or missing device surfaces as
//! `DeviceUnavailable` and is never silently retried.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz (default 16000, matches the VAD).
    pub sample_rate: u32,
    /// Mono capture for recognition.
    pub channels: u16,
    /// Chunk size in samples (default 480 = 30ms at 16kHz, the VAD frame).
    pub buffer_size: usize,
    /// Whether to open a camera track alongside audio.
    pub with_video: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { sample_rate: 16000, channels: 1, buffer_size: 480, with_video: true }
    }
}

/// One chunk of captured PCM, emitted while the audio track is enabled.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// f32 samples normalized to -1.0..1.0.
    pub samples: Vec<f32>,
    pub timestamp: std::time::Instant,
}

/// The open microphone track. The cpal stream itself is not Send, so it
/// lives on a dedicated capture thread; this handle carries the enabled flag
/// and keeps the thread alive. Dropping it stops capture.
pub struct AudioTrack {
    enabled: Arc<AtomicBool>,
    _stop_tx: std::sync::mpsc::Sender<()>,
}

impl AudioTrack {
    /// Mute/unmute without reacquiring the device. While disabled the input
    /// callback drops chunks instead of forwarding them.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// The open camera track. Frame delivery belongs to the embedding UI; the
/// call controller only owns acquisition and the enabled toggle.
pub struct VideoTrack {
    device_label: String,
    enabled: Arc<AtomicBool>,
}

impl VideoTrack {
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn device_label(&self) -> &str {
        &self.device_label
    }
}

/// Media handles for one active call. Exclusively owned; dropping releases
/// the devices.
pub struct MediaTracks {
    pub audio: AudioTrack,
    pub video: Option<VideoTrack>,
}

/// Acquires capture devices and streams audio chunks to the recognizer.
pub struct CaptureAdapter {
    config: CaptureConfig,
}

impl CaptureAdapter {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Acquire microphone (and camera when configured) and start streaming
    /// chunks. Fails with `DeviceUnavailable` when no device is present or
    /// permission is denied.
    pub fn open(self) -> VoiceResult<(MediaTracks, mpsc::UnboundedReceiver<AudioChunk>)> {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let enabled = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (init_tx, init_rx) = std::sync::mpsc::channel::<VoiceResult<()>>();

        let config = self.config.clone();
        let enabled_thread = Arc::clone(&enabled);
        std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture_thread(config, enabled_thread, chunk_tx, stop_rx, init_tx))
            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

        // Wait for the stream to open (or fail) on the capture thread.
        init_rx
            .recv()
            .map_err(|_| VoiceError::DeviceUnavailable("capture thread died".to_string()))??;

        let video = if self.config.with_video {
            Some(VideoTrack {
                device_label: "default-camera".to_string(),
                enabled: Arc::new(AtomicBool::new(true)),
            })
        } else {
            None
        };

        Ok((
            MediaTracks {
                audio: AudioTrack { enabled, _stop_tx: stop_tx },
                video,
            },
            chunk_rx,
        ))
    }

    /// List available input devices.
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

/// Owns the cpal stream for the lifetime of the call. Exits when the
/// `AudioTrack` handle is dropped.
fn capture_thread(
    config: CaptureConfig,
    enabled: Arc<AtomicBool>,
    chunk_tx: mpsc::UnboundedSender<AudioChunk>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    init_tx: std::sync::mpsc::Sender<VoiceResult<()>>,
) {
    let open = || -> VoiceResult<cpal::Stream> {
        let device = cpal::default_host().default_input_device().ok_or_else(|| {
            VoiceError::DeviceUnavailable("no input device available".to_string())
        })?;

        info!(
            "capture: using input device {} ({}Hz mono)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size as u32),
        };

        let buffer_size = config.buffer_size;
        let mut sample_buffer = Vec::with_capacity(buffer_size);

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !enabled.load(Ordering::Relaxed) {
                    // Muted: keep the stream open but drop everything.
                    sample_buffer.clear();
                    return;
                }
                for &sample in data {
                    sample_buffer.push(sample);
                    if sample_buffer.len() >= buffer_size {
                        let chunk = AudioChunk {
                            samples: sample_buffer.clone(),
                            timestamp: std::time::Instant::now(),
                        };
                        if chunk_tx.send(chunk).is_err() {
                            // Receiver gone; nothing to do from the callback.
                        }
                        sample_buffer.clear();
                    }
                }
            },
            move |err| {
                warn!("capture: stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        Ok(stream)
    };

    match open() {
        Ok(stream) => {
            let _ = init_tx.send(Ok(()));
            // Park until the track handle goes away, then release the device.
            let _ = stop_rx.recv();
            drop(stream);
            debug!("capture: stream released");
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
        }
    }
}
