//! Call lifecycle and turn-taking state machine.
//!
//! One controller owns one call. All stimuli arrive as `CallEvent`s on a
//! single channel, so phase transitions are serialized and every race
//! (timeout vs transcript, stale playback completion, double hangup)
//! resolves deterministically. Timers are spawned tasks that post back into
//! the same channel, tagged with a generation; a stale generation is
//! ignored.

use crate::error::{VoiceError, VoiceResult};
use crate::recognizer::{RecognizerFailure, TranscriptEvent};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Opening line once media and voices are ready.
pub const GREETING: &str = "Hello! I'm your AI medical assistant. How can I help you today?";
/// Spoken when the user stays silent past the reply timeout.
pub const RE_PROMPT: &str = "I'm still here to help. Could you tell me more about your symptoms?";
/// Spoken when producing a reply fails.
pub const APOLOGY: &str = "I apologize, but I'm having trouble processing your request right now. Could you please repeat what you said?";
/// Spoken when speech recognition is gone for the rest of the call.
pub const RECOGNITION_LOST: &str = "I can't access speech recognition right now. I'll keep the call open, but I won't be able to hear you.";

/// Where the call currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    /// Acquiring media and voices.
    Connecting,
    /// Media ready, greeting queued.
    GreetingPending,
    /// Recognizer active, reply timer armed.
    Listening,
    /// A committed transcript is being answered.
    Processing,
    /// Assistant audio is playing.
    Speaking,
    /// Between assistant speech and the next listening window.
    WaitingForReply,
    Ended,
}

/// Everything that can happen to a call.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Capture devices and voices are ready.
    MediaReady,
    Transcript(TranscriptEvent),
    RecognizerEnded,
    RecognizerFailed(RecognizerFailure),
    /// Playback of the given speech generation finished.
    SpeakingDone(u64),
    /// The user said nothing for the whole reply window.
    ReplyTimeout(u64),
    /// The post-speech delay elapsed; listening may resume.
    RestartListen(u64),
    Mute(bool),
    Video(bool),
    Hangup,
}

/// Timing knobs. Defaults match the production consultation flow.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Silence window before the assistant re-prompts.
    pub reply_timeout: Duration,
    /// Pause between assistant speech ending and listening resuming.
    pub listen_delay: Duration,
    /// Backoff before retrying a transiently failed recognizer.
    pub retry_backoff: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
            listen_delay: Duration::from_millis(1500),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Seam to the speech hardware: playback on one side, recognition and track
/// toggles on the other. Production wires `Speaker`, `PipelineRecognizer`,
/// and `MediaTracks` behind this.
pub trait SpeechPort: Send {
    /// Queue text for playback, cancelling anything in flight. Returns the
    /// generation that the matching `SpeakingDone` will carry.
    fn speak(&mut self, text: &str) -> VoiceResult<u64>;
    fn cancel_speech(&mut self);
    fn start_listening(&mut self) -> VoiceResult<()>;
    fn stop_listening(&mut self);
    fn set_muted(&mut self, muted: bool);
    fn set_video(&mut self, enabled: bool);
}

/// Produces the assistant's reply to one committed transcript. Either the
/// local reasoner or a relay connection sits behind this.
#[async_trait]
pub trait ReplySource: Send {
    async fn respond(&mut self, transcript: &str) -> VoiceResult<String>;
}

/// Remote-control handle for the embedding UI.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl CallHandle {
    pub fn set_muted(&self, muted: bool) {
        let _ = self.tx.send(CallEvent::Mute(muted));
    }

    pub fn set_video(&self, enabled: bool) {
        let _ = self.tx.send(CallEvent::Video(enabled));
    }

    pub fn hang_up(&self) {
        let _ = self.tx.send(CallEvent::Hangup);
    }
}

pub struct CallController {
    phase: CallPhase,
    config: CallConfig,
    speech: Box<dyn SpeechPort>,
    reply: Box<dyn ReplySource>,
    event_tx: mpsc::UnboundedSender<CallEvent>,

    current_speech: Option<u64>,
    reply_timer: Option<JoinHandle<()>>,
    reply_gen: u64,
    restart_timer: Option<JoinHandle<()>>,
    restart_gen: u64,

    /// Set when recognition is gone for good; the call stays up degraded.
    listening_disabled: bool,
    recognizer_retry_used: bool,
    muted: bool,
    video_enabled: bool,
    /// Committed user turns this call.
    message_count: u64,
    last_speech: Option<std::time::Instant>,
}

impl CallController {
    pub fn new(
        config: CallConfig,
        speech: Box<dyn SpeechPort>,
        reply: Box<dyn ReplySource>,
        event_tx: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        Self {
            phase: CallPhase::Idle,
            config,
            speech,
            reply,
            event_tx,
            current_speech: None,
            reply_timer: None,
            reply_gen: 0,
            restart_timer: None,
            restart_gen: 0,
            listening_disabled: false,
            recognizer_retry_used: false,
            muted: false,
            video_enabled: true,
            message_count: 0,
            last_speech: None,
        }
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// When the user was last heard, interim or final.
    pub fn last_speech(&self) -> Option<std::time::Instant> {
        self.last_speech
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle { tx: self.event_tx.clone() }
    }

    /// Begin connecting. The embedding acquires media and posts `MediaReady`.
    pub fn start(&mut self) -> VoiceResult<()> {
        if self.phase != CallPhase::Idle {
            return Err(VoiceError::Config(format!(
                "call already started (phase {:?})",
                self.phase
            )));
        }
        info!("call: connecting");
        self.phase = CallPhase::Connecting;
        Ok(())
    }

    /// Drive the call to completion.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<CallEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
            if self.phase == CallPhase::Ended {
                break;
            }
        }
    }

    pub async fn handle_event(&mut self, event: CallEvent) {
        if self.phase == CallPhase::Ended {
            // Single-flight teardown: nothing after Ended has any effect.
            return;
        }

        match event {
            CallEvent::MediaReady => self.on_media_ready(),
            CallEvent::Transcript(t) => self.on_transcript(t).await,
            CallEvent::RecognizerEnded => self.on_recognizer_ended(),
            CallEvent::RecognizerFailed(f) => self.on_recognizer_failed(f),
            CallEvent::SpeakingDone(generation) => self.on_speaking_done(generation),
            CallEvent::ReplyTimeout(generation) => self.on_reply_timeout(generation),
            CallEvent::RestartListen(generation) => self.on_restart_listen(generation),
            CallEvent::Mute(muted) => self.on_mute(muted),
            CallEvent::Video(enabled) => {
                debug!("call: video {}", enabled);
                self.video_enabled = enabled;
                self.speech.set_video(enabled);
            }
            CallEvent::Hangup => self.on_hangup(),
        }
    }

    fn on_media_ready(&mut self) {
        if self.phase != CallPhase::Connecting {
            debug!("call: MediaReady ignored in {:?}", self.phase);
            return;
        }
        self.phase = CallPhase::GreetingPending;
        self.say(GREETING);
    }

    async fn on_transcript(&mut self, transcript: TranscriptEvent) {
        if self.phase != CallPhase::Listening {
            debug!("call: transcript ignored in {:?}", self.phase);
            return;
        }

        self.last_speech = Some(std::time::Instant::now());

        if !transcript.is_final {
            // The user is talking; push the silence deadline out.
            self.arm_reply_timer();
            return;
        }

        // Committed turn wins any race with the reply timer.
        self.cancel_reply_timer();
        self.speech.stop_listening();
        self.recognizer_retry_used = false;
        self.message_count += 1;
        self.phase = CallPhase::Processing;
        info!(
            "call: processing turn {} ({} chars)",
            self.message_count,
            transcript.text.len()
        );

        match self.reply.respond(&transcript.text).await {
            Ok(text) => self.say(&text),
            Err(e) => {
                warn!("call: reply failed: {}", e);
                self.say(APOLOGY);
            }
        }
    }

    /// The recognition stream stopped on its own. Restart it after the usual
    /// delay unless something else owns the microphone right now.
    fn on_recognizer_ended(&mut self) {
        if self.muted
            || self.listening_disabled
            || matches!(self.phase, CallPhase::Speaking | CallPhase::Processing)
        {
            debug!("call: recognizer ended, restart suppressed");
            return;
        }
        if self.phase == CallPhase::Listening {
            // The reply timer stays armed across the gap.
            self.phase = CallPhase::WaitingForReply;
        }
        self.arm_restart_timer(self.config.listen_delay);
    }

    fn on_mute(&mut self, muted: bool) {
        debug!("call: mute {}", muted);
        self.muted = muted;
        self.speech.set_muted(muted);
        if muted {
            // Stop hearing, and stop expecting a reply the user cannot give.
            self.cancel_restart_timer();
            self.cancel_reply_timer();
            if self.phase == CallPhase::Listening {
                self.speech.stop_listening();
                self.phase = CallPhase::WaitingForReply;
            }
        } else if self.phase == CallPhase::WaitingForReply && !self.listening_disabled {
            self.arm_restart_timer(self.config.listen_delay);
            self.arm_reply_timer();
        }
    }

    fn on_recognizer_failed(&mut self, failure: RecognizerFailure) {
        match failure {
            RecognizerFailure::Fatal(msg) => self.degrade_listening(&msg),
            RecognizerFailure::Transient(msg) => {
                // The pipeline can report a failure for a turn the call has
                // already moved past. Nothing to retry then.
                if self.muted
                    || self.listening_disabled
                    || matches!(self.phase, CallPhase::Speaking | CallPhase::Processing)
                {
                    debug!(
                        "call: transient recognizer failure ignored in {:?}: {}",
                        self.phase, msg
                    );
                    return;
                }
                if self.recognizer_retry_used {
                    self.degrade_listening(&msg);
                    return;
                }
                warn!("call: recognizer transient failure, retrying: {}", msg);
                self.recognizer_retry_used = true;
                self.speech.stop_listening();
                self.phase = CallPhase::WaitingForReply;
                self.arm_restart_timer(self.config.retry_backoff);
            }
        }
    }

    fn on_speaking_done(&mut self, generation: u64) {
        if self.current_speech != Some(generation) {
            debug!("call: stale SpeakingDone({}) ignored", generation);
            return;
        }
        self.current_speech = None;
        if self.phase != CallPhase::Speaking {
            return;
        }
        self.phase = CallPhase::WaitingForReply;
        if self.listening_disabled || self.muted {
            // Degraded or muted call: stay reachable for hangup, nothing to
            // schedule until that changes.
            return;
        }
        // The silence window opens when the assistant stops talking, not
        // when listening actually resumes.
        self.arm_restart_timer(self.config.listen_delay);
        self.arm_reply_timer();
    }

    fn on_reply_timeout(&mut self, generation: u64) {
        if generation != self.reply_gen
            || !matches!(self.phase, CallPhase::Listening | CallPhase::WaitingForReply)
        {
            debug!("call: stale ReplyTimeout({}) ignored", generation);
            return;
        }
        info!("call: reply window elapsed, re-prompting");
        self.speech.stop_listening();
        self.say(RE_PROMPT);
    }

    fn on_restart_listen(&mut self, generation: u64) {
        if generation != self.restart_gen || self.phase != CallPhase::WaitingForReply {
            debug!("call: stale RestartListen({}) ignored", generation);
            return;
        }
        if self.listening_disabled || self.muted {
            return;
        }
        match self.speech.start_listening() {
            // The reply timer keeps running from the end of speech.
            Ok(()) => self.phase = CallPhase::Listening,
            Err(e) => self.degrade_listening(&e.to_string()),
        }
    }

    fn on_hangup(&mut self) {
        info!("call: hangup");
        self.speech.cancel_speech();
        self.speech.stop_listening();
        self.cancel_reply_timer();
        self.cancel_restart_timer();
        self.current_speech = None;
        self.phase = CallPhase::Ended;
    }

    /// Speak a line and move to Speaking. Any running timers are stale once
    /// the assistant talks.
    fn say(&mut self, text: &str) {
        self.cancel_reply_timer();
        self.cancel_restart_timer();
        match self.speech.speak(text) {
            Ok(generation) => {
                self.current_speech = Some(generation);
                self.phase = CallPhase::Speaking;
            }
            Err(e) => {
                // Keep the turn cycle alive as if the line had played.
                warn!("call: speak failed: {}", e);
                self.current_speech = None;
                self.phase = CallPhase::WaitingForReply;
                if !self.listening_disabled && !self.muted {
                    self.arm_restart_timer(self.config.listen_delay);
                    self.arm_reply_timer();
                }
            }
        }
    }

    fn degrade_listening(&mut self, reason: &str) {
        if self.listening_disabled {
            return;
        }
        warn!("call: speech recognition lost: {}", reason);
        self.listening_disabled = true;
        self.speech.stop_listening();
        self.say(RECOGNITION_LOST);
    }

    fn arm_reply_timer(&mut self) {
        self.cancel_reply_timer();
        self.reply_gen += 1;
        let generation = self.reply_gen;
        let tx = self.event_tx.clone();
        let timeout = self.config.reply_timeout;
        self.reply_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(CallEvent::ReplyTimeout(generation));
        }));
    }

    fn cancel_reply_timer(&mut self) {
        self.reply_gen += 1;
        if let Some(handle) = self.reply_timer.take() {
            handle.abort();
        }
    }

    fn arm_restart_timer(&mut self, delay: Duration) {
        self.cancel_restart_timer();
        self.restart_gen += 1;
        let generation = self.restart_gen;
        let tx = self.event_tx.clone();
        self.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CallEvent::RestartListen(generation));
        }));
    }

    fn cancel_restart_timer(&mut self) {
        self.restart_gen += 1;
        if let Some(handle) = self.restart_timer.take() {
            handle.abort();
        }
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        if let Some(handle) = self.reply_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.restart_timer.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct PortLog {
        spoken: Vec<String>,
        cancels: usize,
        listen_starts: usize,
        listening: bool,
        muted: bool,
        video: bool,
        next_generation: u64,
        fail_listen: bool,
    }

    #[derive(Clone)]
    struct ScriptedPort(Arc<Mutex<PortLog>>);

    impl ScriptedPort {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(PortLog { video: true, ..PortLog::default() })))
        }

        fn log(&self) -> std::sync::MutexGuard<'_, PortLog> {
            self.0.lock().unwrap()
        }
    }

    impl SpeechPort for ScriptedPort {
        fn speak(&mut self, text: &str) -> VoiceResult<u64> {
            let mut log = self.log();
            log.spoken.push(text.to_string());
            log.next_generation += 1;
            Ok(log.next_generation)
        }

        fn cancel_speech(&mut self) {
            self.log().cancels += 1;
        }

        fn start_listening(&mut self) -> VoiceResult<()> {
            let mut log = self.log();
            if log.fail_listen {
                return Err(VoiceError::RecognizerFatal("denied".into()));
            }
            log.listen_starts += 1;
            log.listening = true;
            Ok(())
        }

        fn stop_listening(&mut self) {
            self.log().listening = false;
        }

        fn set_muted(&mut self, muted: bool) {
            self.log().muted = muted;
        }

        fn set_video(&mut self, enabled: bool) {
            self.log().video = enabled;
        }
    }

    struct FixedReply(&'static str);

    #[async_trait]
    impl ReplySource for FixedReply {
        async fn respond(&mut self, _transcript: &str) -> VoiceResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingReply;

    #[async_trait]
    impl ReplySource for FailingReply {
        async fn respond(&mut self, _transcript: &str) -> VoiceResult<String> {
            Err(VoiceError::Transport("relay down".into()))
        }
    }

    fn build(
        reply: Box<dyn ReplySource>,
    ) -> (CallController, ScriptedPort, mpsc::UnboundedReceiver<CallEvent>) {
        build_with(CallConfig::default(), reply)
    }

    fn build_with(
        config: CallConfig,
        reply: Box<dyn ReplySource>,
    ) -> (CallController, ScriptedPort, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let port = ScriptedPort::new();
        let ctrl = CallController::new(config, Box::new(port.clone()), reply, tx);
        (ctrl, port, rx)
    }

    /// Feed every queued event into the controller.
    async fn pump(ctrl: &mut CallController, rx: &mut mpsc::UnboundedReceiver<CallEvent>) {
        while let Ok(event) = rx.try_recv() {
            ctrl.handle_event(event).await;
        }
    }

    fn final_transcript(text: &str) -> CallEvent {
        CallEvent::Transcript(TranscriptEvent { text: text.to_string(), is_final: true })
    }

    fn interim() -> CallEvent {
        CallEvent::Transcript(TranscriptEvent { text: String::new(), is_final: false })
    }

    #[tokio::test(start_paused = true)]
    async fn happy_turn_greets_listens_and_replies() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("Take care of yourself.")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
        assert_eq!(port.log().spoken, vec![GREETING.to_string()]);

        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        assert_eq!(ctrl.phase(), CallPhase::WaitingForReply);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Listening);
        assert!(port.log().listening);

        ctrl.handle_event(final_transcript("I have a headache")).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
        assert_eq!(port.log().spoken.last().unwrap(), "Take care of yourself.");
        assert!(!port.log().listening);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_timeout_re_prompts() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Listening);

        tokio::time::sleep(Duration::from_millis(10100)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
        assert_eq!(port.log().spoken.last().unwrap(), RE_PROMPT);
    }

    #[tokio::test(start_paused = true)]
    async fn interim_transcript_extends_reply_window() {
        let (mut ctrl, _port, mut rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;

        // The 10s window runs from the end of speech. 8s in, speech onset
        // pushes the deadline out; 9 more seconds still stay inside it.
        tokio::time::sleep(Duration::from_secs(8)).await;
        pump(&mut ctrl, &mut rx).await;
        ctrl.handle_event(interim()).await;
        tokio::time::sleep(Duration::from_secs(9)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Listening);

        // A little more silence crosses the extended deadline.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn final_transcript_beats_raced_timeout() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("answer")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        let stale_generation = 1;

        ctrl.handle_event(final_transcript("hello")).await;
        // A timeout that fired concurrently arrives afterwards and is stale.
        ctrl.handle_event(CallEvent::ReplyTimeout(stale_generation)).await;
        assert_eq!(port.log().spoken.last().unwrap(), "answer");
        assert!(!port.log().spoken.contains(&RE_PROMPT.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_speaking_done_is_ignored() {
        let (mut ctrl, _port, _rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(99)).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn hangup_is_single_flight_and_cancels_speech() {
        let (mut ctrl, port, _rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::Hangup).await;
        assert_eq!(ctrl.phase(), CallPhase::Ended);
        assert_eq!(port.log().cancels, 1);

        ctrl.handle_event(CallEvent::Hangup).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        assert_eq!(ctrl.phase(), CallPhase::Ended);
        assert_eq!(port.log().cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reply_speaks_apology() {
        let (mut ctrl, port, mut rx) = build(Box::new(FailingReply));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;

        ctrl.handle_event(final_transcript("help")).await;
        assert_eq!(port.log().spoken.last().unwrap(), APOLOGY);
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_recognizer_failure_degrades_call() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;

        ctrl.handle_event(CallEvent::RecognizerFailed(RecognizerFailure::Fatal(
            "permission denied".into(),
        )))
        .await;
        assert_eq!(port.log().spoken.last().unwrap(), RECOGNITION_LOST);

        // After the degraded line finishes the call parks: no listening.
        let generation = port.log().next_generation;
        ctrl.handle_event(CallEvent::SpeakingDone(generation)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::WaitingForReply);
        assert!(!port.log().listening);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_once_then_degrades() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(port.log().listen_starts, 1);

        ctrl.handle_event(CallEvent::RecognizerFailed(RecognizerFailure::Transient(
            "network blip".into(),
        )))
        .await;
        // Phase stays Listening-adjacent until the backoff restart fires.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        pump(&mut ctrl, &mut rx).await;

        ctrl.handle_event(CallEvent::RecognizerFailed(RecognizerFailure::Transient(
            "network blip again".into(),
        )))
        .await;
        assert_eq!(port.log().spoken.last().unwrap(), RECOGNITION_LOST);
    }

    #[tokio::test(start_paused = true)]
    async fn mute_and_video_forward_to_port() {
        let (mut ctrl, port, _rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::Mute(true)).await;
        ctrl.handle_event(CallEvent::Video(false)).await;
        assert!(port.log().muted);
        assert!(!port.log().video);
        ctrl.handle_event(CallEvent::Mute(false)).await;
        assert!(!port.log().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_during_speech_does_not_restart_listening() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("answer")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;

        ctrl.handle_event(final_transcript("hello")).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);

        // A failure for the already-committed turn straggles in while the
        // reply is still playing. It must not bring listening back.
        ctrl.handle_event(CallEvent::RecognizerFailed(RecognizerFailure::Transient(
            "late stt error".into(),
        )))
        .await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
        assert!(!port.log().listening);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_can_fire_before_listening_resumes() {
        let config = CallConfig {
            reply_timeout: Duration::from_secs(2),
            listen_delay: Duration::from_secs(3),
            retry_backoff: Duration::from_secs(2),
        };
        let (mut ctrl, port, mut rx) = build_with(config, Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        assert_eq!(ctrl.phase(), CallPhase::WaitingForReply);

        // The silence window elapses before the listen restart ever fires.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Speaking);
        assert_eq!(port.log().spoken.last().unwrap(), RE_PROMPT);
    }

    #[tokio::test(start_paused = true)]
    async fn mute_pauses_listening_until_unmuted() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Listening);

        ctrl.handle_event(CallEvent::Mute(true)).await;
        assert_eq!(ctrl.phase(), CallPhase::WaitingForReply);
        assert!(!port.log().listening);

        // Muted silence never re-prompts and never restarts listening.
        tokio::time::sleep(Duration::from_secs(30)).await;
        pump(&mut ctrl, &mut rx).await;
        assert!(!port.log().spoken.contains(&RE_PROMPT.to_string()));
        assert!(!port.log().listening);

        ctrl.handle_event(CallEvent::Mute(false)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Listening);
        assert!(port.log().listening);
    }

    #[tokio::test(start_paused = true)]
    async fn ended_recognizer_restarts_after_delay() {
        let (mut ctrl, port, mut rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        ctrl.handle_event(CallEvent::MediaReady).await;
        ctrl.handle_event(CallEvent::SpeakingDone(1)).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(port.log().listen_starts, 1);

        ctrl.handle_event(CallEvent::RecognizerEnded).await;
        assert_eq!(ctrl.phase(), CallPhase::WaitingForReply);
        tokio::time::sleep(Duration::from_millis(1600)).await;
        pump(&mut ctrl, &mut rx).await;
        assert_eq!(ctrl.phase(), CallPhase::Listening);
        assert_eq!(port.log().listen_starts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected() {
        let (mut ctrl, _port, _rx) = build(Box::new(FixedReply("ok")));
        ctrl.start().unwrap();
        assert!(ctrl.start().is_err());
    }
}
