//! Wire messages exchanged over an assessment connection.
//!
//! Every message is a JSON text frame tagged by `"type"`. The only other
//! client frame is a binary utterance, which is valid only after an
//! `audio_complete` control message.
//!
//! # Client messages
//!
//! - `audio_complete` - the next binary frame is the finished utterance
//! - `user_transcript` - supplies the utterance text directly
//!
//! # Server messages
//!
//! - `transcript` - utterance text from either party, with optional audio
//! - `phase_transition` - announces the next phase
//! - `reading_passage` - a new passage to translate
//! - `reading_evaluation` - feedback on a translation
//! - `assessment_complete` - last message before the server closes
//! - `error` - a fault notice; the session continues unless it closes

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lexi_report::ProficiencyLevel;
use serde::{Deserialize, Serialize};

pub use crate::session_state::Speaker;
use crate::session_state::{Evaluation, Phase};

// ============================================================================
// Client Messages
// ============================================================================

/// Control message sent by the client as a text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The next binary frame holds the completed utterance.
    AudioComplete,
    /// Utterance text supplied without audio.
    UserTranscript {
        /// What the user said or wrote.
        #[serde(default)]
        text: String,
    },
}

/// One frame received from the client, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// A parsed control message.
    Control(ClientMessage),
    /// Raw utterance audio.
    Binary(Vec<u8>),
    /// A text frame that is not a known control message.
    Malformed(String),
}

impl ClientFrame {
    /// Classifies a text frame.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        serde_json::from_str(text).map_or_else(|_| Self::Malformed(text.to_string()), Self::Control)
    }
}

// ============================================================================
// Server Messages
// ============================================================================

/// Message sent by the server as a JSON text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Utterance text from either party.
    Transcript {
        /// Who spoke.
        speaker: Speaker,
        /// Utterance text.
        text: String,
        /// Base64 synthesized speech, `null` when unavailable.
        audio: Option<String>,
    },
    /// The session moved to a new phase.
    PhaseTransition {
        /// Announcement text.
        text: String,
        /// Base64 synthesized speech, `null` when unavailable.
        audio: Option<String>,
        /// The phase just entered.
        new_phase: Phase,
    },
    /// A new passage to translate.
    ReadingPassage {
        /// Source passage in the target language.
        passage: String,
        /// Language of the passage.
        language: String,
        /// Difficulty the passage was produced for.
        difficulty: u8,
        /// What the user should do with it.
        instruction: String,
    },
    /// Feedback on a translation turn.
    ReadingEvaluation {
        /// Spoken feedback text.
        text: String,
        /// Base64 synthesized speech, `null` when unavailable.
        audio: Option<String>,
        /// Scores and feedback for the translation.
        evaluation: Evaluation,
    },
    /// The assessment finished; the server closes after this message.
    AssessmentComplete {
        /// Closing text.
        text: String,
        /// Base64 synthesized speech, `null` when unavailable.
        audio: Option<String>,
        /// Final CEFR band.
        proficiency: ProficiencyLevel,
        /// Number of scored exercises.
        total_evaluations: usize,
    },
    /// A fault notice.
    Error {
        /// Human-readable message.
        message: String,
    },
}

/// Encodes synthesized audio for the wire.
#[must_use]
pub fn encode_audio(audio: Option<&[u8]>) -> Option<String> {
    audio.map(|bytes| STANDARD.encode(bytes))
}

impl ServerMessage {
    /// Creates an assessor transcript line.
    #[must_use]
    pub fn ai_transcript(text: impl Into<String>, audio: Option<String>) -> Self {
        Self::Transcript {
            speaker: Speaker::Ai,
            text: text.into(),
            audio,
        }
    }

    /// Creates a transcript line echoing the user.
    #[must_use]
    pub fn user_transcript(text: impl Into<String>) -> Self {
        Self::Transcript {
            speaker: Speaker::User,
            text: text.into(),
            audio: None,
        }
    }

    /// Creates an `error` message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Returns the `"type"` tag of this message.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Transcript { .. } => "transcript",
            Self::PhaseTransition { .. } => "phase_transition",
            Self::ReadingPassage { .. } => "reading_passage",
            Self::ReadingEvaluation { .. } => "reading_evaluation",
            Self::AssessmentComplete { .. } => "assessment_complete",
            Self::Error { .. } => "error",
        }
    }
}
