//! In-process doubles for driving sessions without real backends.
//!
//! Used by unit tests in this crate and by the integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, Mutex};

use crate::error::{LexiError, Result, ServiceKind};
use crate::protocol::{ClientFrame, ClientMessage, ServerMessage};
use crate::services::{
    Clock, CompletionRequest, LanguageModel, LogNotifier, Notifier, Services, SpeechSynthesizer,
    SystemClock, TokenGenerator, Transcriber,
};
use crate::transport::Transport;

// ============================================================================
// Language Model
// ============================================================================

/// Language model that replays queued replies.
///
/// JSON requests (scoring) and text requests (generation) draw from separate
/// queues. An empty queue fails the call like an unreachable backend would.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    json_replies: Mutex<VecDeque<String>>,
    text_replies: Mutex<VecDeque<String>>,
    calls: Arc<AtomicUsize>,
    failing: bool,
    delay: Option<Duration>,
}

impl ScriptedModel {
    /// Creates a model whose JSON requests get `replies` in order.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            json_replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Creates a model that fails every call.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Queues replies for text requests.
    #[must_use]
    pub fn with_texts<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text_replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    /// Delays every reply.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    /// Shared counter of `complete` calls.
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(LexiError::service(ServiceKind::LanguageModel, "scripted failure"));
        }

        let queue = if request.json {
            &self.json_replies
        } else {
            &self.text_replies
        };
        queue
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LexiError::service(ServiceKind::LanguageModel, "no scripted reply"))
    }
}

/// A JSON scoring reply for a speaking turn.
#[must_use]
pub fn speaking_reply(grammar: f64, fluency: f64) -> String {
    format!(
        r#"{{"grammar_score": {grammar}, "fluency_score": {fluency}, "feedback": "Thanks, good answer.", "errors": []}}"#
    )
}

/// A JSON scoring reply for a translation turn.
#[must_use]
pub fn translation_reply(accuracy: f64, grammar: f64) -> String {
    format!(
        r#"{{"accuracy_score": {accuracy}, "grammar_score": {grammar}, "feedback": "Solid translation.", "errors": []}}"#
    )
}

// ============================================================================
// Speech
// ============================================================================

/// Transcriber that answers every utterance with the same text.
#[derive(Debug)]
pub struct FixedTranscriber {
    text: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl FixedTranscriber {
    /// Creates a transcriber that returns `text`.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            calls: Arc::default(),
        }
    }

    /// Creates a transcriber that fails every call.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            text: None,
            calls: Arc::default(),
        }
    }

    /// Shared counter of `transcribe` calls.
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: Vec<u8>, _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| LexiError::service(ServiceKind::Transcription, "scripted failure"))
    }
}

/// Synthesizer that returns a few bytes of silence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSynthesizer;

/// Bytes returned by [`SilentSynthesizer`].
pub const SILENCE: &[u8] = &[0, 0, 0, 0];

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Ok(SILENCE.to_vec())
    }
}

/// Synthesizer that fails every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSynthesizer;

#[async_trait]
impl SpeechSynthesizer for FailingSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Err(LexiError::service(ServiceKind::SpeechSynthesis, "scripted failure"))
    }
}

// ============================================================================
// Notifier, Tokens, Clock
// ============================================================================

/// A notice captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Recipient address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
}

/// Notifier that keeps every notice in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices sent so far.
    pub async fn notices(&self) -> Vec<Notice> {
        self.notices.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        self.notices.lock().await.push(Notice {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Token generator producing `conn-1`, `conn-2`, ...
#[derive(Debug, Default)]
pub struct SequentialTokens {
    next: AtomicUsize,
}

impl TokenGenerator for SequentialTokens {
    fn generate(&self) -> String {
        format!("conn-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock stopped at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Services built from doubles: the given model, a fixed transcriber,
/// silent speech, a log notifier, sequential tokens and the system clock.
///
/// Fields are public, so tests swap in whatever else they need.
#[must_use]
pub fn services(model: ScriptedModel) -> Services {
    Services {
        model: Arc::new(model),
        transcriber: Arc::new(FixedTranscriber::new(
            "Me llamo Ana y trabajo en un hospital en Madrid.",
        )),
        synthesizer: Arc::new(SilentSynthesizer),
        notifier: Arc::new(LogNotifier),
        tokens: Arc::new(SequentialTokens::default()),
        clock: Arc::new(SystemClock),
        timeout: Duration::from_secs(5),
    }
}

// ============================================================================
// Channel Transport
// ============================================================================

/// Server half of an in-memory connection.
#[derive(Debug)]
pub struct ChannelTransport {
    frames: mpsc::UnboundedReceiver<Result<ClientFrame>>,
    messages: mpsc::UnboundedSender<ServerMessage>,
    closed: Arc<AtomicBool>,
    sends_fail: Arc<AtomicBool>,
}

/// Client half of an in-memory connection.
#[derive(Debug)]
pub struct ChannelClient {
    frames: Option<mpsc::UnboundedSender<Result<ClientFrame>>>,
    messages: mpsc::UnboundedReceiver<ServerMessage>,
    closed: Arc<AtomicBool>,
    sends_fail: Arc<AtomicBool>,
}

/// Creates a connected transport/client pair.
#[must_use]
pub fn channel_transport() -> (ChannelTransport, ChannelClient) {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let sends_fail = Arc::new(AtomicBool::new(false));

    (
        ChannelTransport {
            frames: frame_rx,
            messages: message_tx,
            closed: Arc::clone(&closed),
            sends_fail: Arc::clone(&sends_fail),
        },
        ChannelClient {
            frames: Some(frame_tx),
            messages: message_rx,
            closed,
            sends_fail,
        },
    )
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Option<Result<ClientFrame>> {
        self.frames.recv().await
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<()> {
        if self.sends_fail.load(Ordering::SeqCst) {
            return Err(LexiError::transport("connection reset"));
        }
        self.messages
            .send(message.clone())
            .map_err(|_| LexiError::transport("client went away"))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl ChannelClient {
    fn push(&self, frame: Result<ClientFrame>) {
        if let Some(frames) = &self.frames {
            // the session may already have ended
            let _ = frames.send(frame);
        }
    }

    /// Sends a control message.
    pub fn send(&self, message: ClientMessage) {
        self.push(Ok(ClientFrame::Control(message)));
    }

    /// Sends a `user_transcript` message.
    pub fn say(&self, text: impl Into<String>) {
        self.send(ClientMessage::UserTranscript { text: text.into() });
    }

    /// Sends a binary utterance frame.
    pub fn send_audio(&self, audio: Vec<u8>) {
        self.push(Ok(ClientFrame::Binary(audio)));
    }

    /// Sends a text frame that is not a known message.
    pub fn send_garbage(&self, text: impl Into<String>) {
        self.push(Ok(ClientFrame::Malformed(text.into())));
    }

    /// Makes the server's next receive fail with a transport error.
    pub fn break_receive(&self, reason: impl std::fmt::Display) {
        self.push(Err(LexiError::transport(reason)));
    }

    /// Makes every later server send fail with a transport error.
    pub fn break_sends(&self) {
        self.sends_fail.store(true, Ordering::SeqCst);
    }

    /// Drops the client side of the connection.
    pub fn disconnect(&mut self) {
        self.frames = None;
    }

    /// Next message from the server, `None` once the server side is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.messages.recv().await
    }

    /// Every message the server has sent so far.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.messages.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Whether the server closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
