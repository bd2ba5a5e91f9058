//! Capabilities injected into a session.
//!
//! Transcription, scoring/generation, speech synthesis, notification, token
//! generation and the wall clock are all reached through the traits in this
//! module, so a session can be driven by real backends or by the doubles in
//! [`crate::testing`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::info;

use crate::error::{LexiError, Result, ServiceKind};

// ============================================================================
// Capability Traits
// ============================================================================

/// One request to the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// System instructions.
    pub system: String,
    /// User message.
    pub prompt: String,
    /// Ask the backend for a JSON object.
    pub json: bool,
}

impl CompletionRequest {
    /// Creates a plain-text request.
    #[must_use]
    pub fn text(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            json: false,
        }
    }

    /// Creates a request whose answer should be a JSON object.
    #[must_use]
    pub fn json(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            json: true,
        }
    }
}

/// Chat-style language model used for scoring and generation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model's reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Speech-to-text backend.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes one utterance spoken in `language`.
    async fn transcribe(&self, audio: Vec<u8>, language: &str) -> Result<String>;
}

/// Text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns encoded audio for `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Delivers out-of-band notices such as assessment completion.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notice.
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// Produces opaque, unguessable identifiers.
pub trait TokenGenerator: Send + Sync {
    /// Returns a fresh token.
    fn generate(&self) -> String;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

// ============================================================================
// Default Implementations
// ============================================================================

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Number of random bytes in a connection token.
const TOKEN_BYTES: usize = 32;

/// URL-safe base64 of 32 random bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Notifier that records notices in the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        info!(recipient, subject, body_len = body.len(), "Notification");
        Ok(())
    }
}

/// Stand-in for backends that are not configured (e.g. no API key).
///
/// Every call fails, so the evaluator and generator use their fallbacks and
/// replies are sent without audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledService;

impl DisabledService {
    fn unavailable(service: ServiceKind) -> LexiError {
        LexiError::service(service, "backend not configured")
    }
}

#[async_trait]
impl LanguageModel for DisabledService {
    async fn complete(&self, _request: CompletionRequest) -> Result<String> {
        Err(Self::unavailable(ServiceKind::LanguageModel))
    }
}

#[async_trait]
impl Transcriber for DisabledService {
    async fn transcribe(&self, _audio: Vec<u8>, _language: &str) -> Result<String> {
        Err(Self::unavailable(ServiceKind::Transcription))
    }
}

#[async_trait]
impl SpeechSynthesizer for DisabledService {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Err(Self::unavailable(ServiceKind::SpeechSynthesis))
    }
}

// ============================================================================
// Service Bundle
// ============================================================================

/// Every capability a session needs, shared across sessions.
#[derive(Clone)]
pub struct Services {
    /// Scoring and generation.
    pub model: Arc<dyn LanguageModel>,
    /// Speech-to-text.
    pub transcriber: Arc<dyn Transcriber>,
    /// Text-to-speech.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Completion notices.
    pub notifier: Arc<dyn Notifier>,
    /// Connection tokens.
    pub tokens: Arc<dyn TokenGenerator>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Upper bound on each external call.
    pub timeout: Duration,
}

impl Services {
    /// Services with every backend disabled, real clock and tokens.
    #[must_use]
    pub fn disabled(timeout: Duration) -> Self {
        Self {
            model: Arc::new(DisabledService),
            transcriber: Arc::new(DisabledService),
            synthesizer: Arc::new(DisabledService),
            notifier: Arc::new(LogNotifier),
            tokens: Arc::new(RandomTokenGenerator),
            clock: Arc::new(SystemClock),
            timeout,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Runs `future`, turning an elapsed timeout into `LexiError::ServiceTimeout`.
pub async fn with_timeout<T, F>(service: ServiceKind, timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| Err(LexiError::service_timeout(service, timeout.as_secs())))
}

// ============================================================================
// Language Codes
// ============================================================================

/// ISO 639-1 code for a language name, `"en"` when unknown.
///
/// # Examples
///
/// ```
/// use lexi_orchestrator::services::language_code;
///
/// assert_eq!(language_code("Spanish"), "es");
/// assert_eq!(language_code("japanese"), "ja");
/// assert_eq!(language_code("Klingon"), "en");
/// ```
#[must_use]
pub fn language_code(language: &str) -> &'static str {
    match language.trim().to_lowercase().as_str() {
        "spanish" => "es",
        "french" => "fr",
        "german" => "de",
        "italian" => "it",
        "portuguese" => "pt",
        "chinese" => "zh",
        "japanese" => "ja",
        "korean" => "ko",
        "arabic" => "ar",
        "russian" => "ru",
        "hindi" => "hi",
        _ => "en",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(language_code("French"), "fr");
        assert_eq!(language_code(" GERMAN "), "de");
        assert_eq!(language_code("English"), "en");
        assert_eq!(language_code(""), "en");
    }

    #[test]
    fn test_random_tokens_are_url_safe_and_distinct() {
        let generator = RandomTokenGenerator;
        let a = generator.generate();
        let b = generator.generate();

        // 32 bytes -> 43 unpadded base64 characters
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed_to_service_timeout() {
        let result: Result<()> = with_timeout(
            ServiceKind::Transcription,
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(LexiError::ServiceTimeout {
                service: ServiceKind::Transcription,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_results() {
        let ok = with_timeout(ServiceKind::LanguageModel, Duration::from_secs(1), async {
            Ok::<_, LexiError>(7)
        })
        .await
        .unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn test_disabled_service_fails_every_call() {
        let service = DisabledService;
        assert!(LanguageModel::complete(&service, CompletionRequest::text("s", "p"))
            .await
            .is_err());
        assert!(service.transcribe(vec![1, 2, 3], "es").await.is_err());
        assert!(service.synthesize("hola").await.is_err());
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier.notify("a@b.c", "Done", "body").await.is_ok());
    }
}
