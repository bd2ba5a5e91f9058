//! Configuration types for the Lexi assessment orchestrator.
//!
//! This module provides the configuration structures that control phase
//! timing, starting difficulty, the file-backed store location, the
//! speech and language model backend, and completion notifications.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::difficulty::{MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::error::{LexiError, Result};
use crate::phase::PhaseDurations;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "lexi.json";

/// Default language under assessment when a session carries none.
fn default_language() -> String {
    "Spanish".to_string()
}

/// Default language translations are given in.
fn default_response_language() -> String {
    "English".to_string()
}

/// Default starting difficulty.
const fn default_initial_difficulty() -> u8 {
    3
}

/// Default speaking window in seconds.
const fn default_speaking_phase_seconds() -> u64 {
    120
}

/// Default reading window in seconds.
const fn default_reading_phase_seconds() -> u64 {
    90
}

/// Default timeout for each external service call in seconds.
const fn default_service_timeout_seconds() -> u64 {
    30
}

/// Default root directory of the file-backed store.
fn default_store_dir() -> String {
    ".lexi".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_speech_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Main configuration for Lexi.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Language assessed when a new session is created.
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Language the user translates reading passages into.
    #[serde(default = "default_response_language")]
    pub response_language: String,

    /// Difficulty of the first exercise (1-10).
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: u8,

    /// Length of the speaking window in seconds.
    #[serde(default = "default_speaking_phase_seconds")]
    pub speaking_phase_seconds: u64,

    /// Length of the reading window in seconds.
    #[serde(default = "default_reading_phase_seconds")]
    pub reading_phase_seconds: u64,

    /// Upper bound on each transcription, model, or synthesis call.
    #[serde(default = "default_service_timeout_seconds")]
    pub service_timeout_seconds: u64,

    /// Root directory for session snapshots and result records.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Speech and language model backend.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Completion notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            response_language: default_response_language(),
            initial_difficulty: default_initial_difficulty(),
            speaking_phase_seconds: default_speaking_phase_seconds(),
            reading_phase_seconds: default_reading_phase_seconds(),
            service_timeout_seconds: default_service_timeout_seconds(),
            store_dir: default_store_dir(),
            llm: LlmConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `lexi.json` in the current directory. If found, loads and
    /// validates the configuration. If not found, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            LexiError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `lexi.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `LexiError::ConfigParseError` if the file exists but contains
    /// invalid JSON or an unknown provider.
    ///
    /// Returns `LexiError::ConfigValidationError` if the configuration values
    /// are invalid (e.g., zero-length phases, out-of-range difficulty).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(LexiError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LexiError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `LexiError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.initial_difficulty) {
            return Err(LexiError::config_validation(
                format!(
                    "initialDifficulty must be between {MIN_DIFFICULTY} and {MAX_DIFFICULTY}, got {}",
                    self.initial_difficulty
                ),
                "Set initialDifficulty to a value from 1 to 10 in your lexi.json",
            ));
        }

        if self.speaking_phase_seconds == 0 {
            return Err(LexiError::config_validation(
                "speakingPhaseSeconds must be greater than 0",
                "Set speakingPhaseSeconds to at least 1 second in your lexi.json",
            ));
        }

        if self.reading_phase_seconds == 0 {
            return Err(LexiError::config_validation(
                "readingPhaseSeconds must be greater than 0",
                "Set readingPhaseSeconds to at least 1 second in your lexi.json",
            ));
        }

        if self.service_timeout_seconds == 0 {
            return Err(LexiError::config_validation(
                "serviceTimeoutSeconds must be greater than 0",
                "Set serviceTimeoutSeconds to at least 1 second in your lexi.json",
            ));
        }

        if self.default_language.trim().is_empty() {
            return Err(LexiError::config_validation(
                "defaultLanguage must not be empty",
                "Name the language to assess in your lexi.json, e.g. \"Spanish\"",
            ));
        }

        if self.store_dir.trim().is_empty() {
            return Err(LexiError::config_validation(
                "storeDir must not be empty",
                "Provide a valid store directory in your lexi.json (e.g. \".lexi\")",
            ));
        }

        if self.llm.base_url.trim().is_empty() {
            return Err(LexiError::config_validation(
                "llm.baseUrl must not be empty",
                "Set llm.baseUrl to an OpenAI-compatible endpoint in your lexi.json",
            ));
        }

        Ok(())
    }

    /// Phase windows derived from the configured durations.
    #[must_use]
    pub const fn phase_durations(&self) -> PhaseDurations {
        PhaseDurations {
            speaking: Duration::from_secs(self.speaking_phase_seconds),
            reading: Duration::from_secs(self.reading_phase_seconds),
        }
    }

    /// Upper bound applied to each external service call.
    #[must_use]
    pub const fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_seconds)
    }
}

/// Supported speech and language model providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    /// `OpenAI` or any API-compatible endpoint.
    #[default]
    OpenAi,
}

impl LlmProvider {
    /// Parses a string into an `LlmProvider`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for LlmProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid LLM provider '{s}': expected 'openai'"
            ))
        })
    }
}

impl Serialize for LlmProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::OpenAi => serializer.serialize_str("openai"),
        }
    }
}

/// Backend settings for transcription, scoring, generation, and synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Which provider protocol to speak.
    #[serde(default)]
    pub provider: LlmProvider,

    /// Base URL of the API, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model used for evaluation and generation.
    #[serde(default = "default_model")]
    pub model: String,

    /// Speech-to-text model.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Text-to-speech model.
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Voice used for synthesized replies.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            base_url: default_base_url(),
            model: default_model(),
            transcription_model: default_transcription_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Completion notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Address that receives a notice when an assessment completes.
    #[serde(default)]
    pub recipient: Option<String>,
}
