//! Error types for the Lexi assessment orchestrator.
//!
//! This module defines the error hierarchy for all orchestrator operations,
//! including configuration loading, external speech and language services,
//! session state transitions, persistence, and the client transport.

use std::path::PathBuf;

/// A specialized `Result` type for Lexi orchestrator operations.
pub type Result<T> = std::result::Result<T, LexiError>;

/// Errors that can occur while running an assessment.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help operators resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum LexiError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your lexi.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // External Service Errors
    // ========================================================================
    /// A transcription, language model, or speech synthesis call failed.
    #[error("{service} service failed: {message}\n\nSuggestion: {}", .service.suggestion())]
    ServiceFailure {
        /// Which backend failed.
        service: ServiceKind,
        /// Detailed error message from the backend.
        message: String,
    },

    /// An external service call did not answer in time.
    #[error("{service} service timed out after {timeout_secs}s\n\nSuggestion: Raise serviceTimeoutSeconds in lexi.json or check the backend's status")]
    ServiceTimeout {
        /// Which backend timed out.
        service: ServiceKind,
        /// The timeout duration in seconds.
        timeout_secs: u64,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Another connection already owns this assessment.
    #[error("Assessment '{assessment_id}' already has an active session\n\nSuggestion: Close the other connection before reconnecting")]
    SessionAlreadyActive {
        /// The contested assessment identifier.
        assessment_id: String,
    },

    /// The assessment already reached its terminal phase.
    #[error("Assessment '{assessment_id}' is already complete")]
    SessionComplete {
        /// The finished assessment identifier.
        assessment_id: String,
    },

    /// A phase change that would move the session backwards or sideways.
    #[error("Invalid phase transition: cannot go from {from} to {to}")]
    InvalidPhaseTransition {
        /// The current phase.
        from: String,
        /// The attempted target phase.
        to: String,
    },

    /// An exercise was offered without the scores its type requires.
    #[error("Exercise {exercise_id} is missing scores required for its type")]
    IncompleteEvaluation {
        /// Identifier of the rejected exercise.
        exercise_id: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// The record store could not read or write a record.
    #[error("Store failure at '{path}': {message}\n\nSuggestion: Check write permissions and available disk space for storeDir")]
    StoreFailure {
        /// Path (or key) of the record involved.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The client connection failed while sending or receiving.
    #[error("Transport failure: {0}")]
    Transport(String),

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// External backends the orchestrator depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Speech-to-text.
    Transcription,
    /// Scoring and exercise generation.
    LanguageModel,
    /// Text-to-speech.
    SpeechSynthesis,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transcription => write!(f, "transcription"),
            Self::LanguageModel => write!(f, "language_model"),
            Self::SpeechSynthesis => write!(f, "speech_synthesis"),
        }
    }
}

impl ServiceKind {
    /// Returns a suggestion message for failures of this backend.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Transcription => "Check the audio format and the transcription model name",
            Self::LanguageModel => "Check your API key and the configured model",
            Self::SpeechSynthesis => "Check the speech model and voice settings",
        }
    }
}

impl LexiError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `ServiceFailure` error.
    #[must_use]
    pub fn service(service: ServiceKind, message: impl Into<String>) -> Self {
        Self::ServiceFailure {
            service,
            message: message.into(),
        }
    }

    /// Creates a new `ServiceTimeout` error.
    #[must_use]
    pub const fn service_timeout(service: ServiceKind, timeout_secs: u64) -> Self {
        Self::ServiceTimeout {
            service,
            timeout_secs,
        }
    }

    /// Creates a new `SessionAlreadyActive` error.
    #[must_use]
    pub fn session_already_active(assessment_id: impl Into<String>) -> Self {
        Self::SessionAlreadyActive {
            assessment_id: assessment_id.into(),
        }
    }

    /// Creates a new `SessionComplete` error.
    #[must_use]
    pub fn session_complete(assessment_id: impl Into<String>) -> Self {
        Self::SessionComplete {
            assessment_id: assessment_id.into(),
        }
    }

    /// Creates a new `InvalidPhaseTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidPhaseTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a new `IncompleteEvaluation` error.
    #[must_use]
    pub fn incomplete_evaluation(exercise_id: impl std::fmt::Display) -> Self {
        Self::IncompleteEvaluation {
            exercise_id: exercise_id.to_string(),
        }
    }

    /// Creates a new `StoreFailure` error.
    #[must_use]
    pub fn store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServiceFailure { .. } | Self::ServiceTimeout { .. }
        )
    }

    /// Returns `true` if this error is fatal and ends the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::StoreFailure { .. }
                | Self::Transport(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = LexiError::session_already_active("asm_1");
        let msg = err.to_string();
        assert!(msg.contains("asm_1"));
        assert!(msg.contains("already has an active session"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_service_kind_display() {
        assert_eq!(ServiceKind::Transcription.to_string(), "transcription");
        assert_eq!(ServiceKind::LanguageModel.to_string(), "language_model");
        assert_eq!(ServiceKind::SpeechSynthesis.to_string(), "speech_synthesis");
    }

    #[test]
    fn test_service_failure_includes_suggestion() {
        let err = LexiError::service(ServiceKind::LanguageModel, "401 Unauthorized");
        let msg = err.to_string();
        assert!(msg.contains("language_model service failed"));
        assert!(msg.contains("401 Unauthorized"));
        assert!(msg.contains("API key"));
    }

    #[test]
    fn test_is_transient() {
        assert!(LexiError::service(ServiceKind::Transcription, "boom").is_transient());
        assert!(LexiError::service_timeout(ServiceKind::LanguageModel, 30).is_transient());
        assert!(!LexiError::transport("closed").is_transient());
        assert!(!LexiError::session_complete("asm_1").is_transient());
    }

    #[test]
    fn test_is_fatal() {
        assert!(LexiError::transport("reset by peer").is_fatal());
        assert!(LexiError::store("/tmp/x.json", "disk full").is_fatal());
        assert!(LexiError::config_validation("bad", "fix it").is_fatal());
        assert!(!LexiError::service(ServiceKind::SpeechSynthesis, "boom").is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let lexi_err: LexiError = io_err.into();
        assert!(matches!(lexi_err, LexiError::Io(_)));
    }

    #[test]
    fn test_timeout_display() {
        let err = LexiError::service_timeout(ServiceKind::Transcription, 30);
        let msg = err.to_string();
        assert!(msg.contains("transcription service timed out after 30s"));
        assert!(msg.contains("serviceTimeoutSeconds"));
    }
}
