//! OpenAI-compatible speech and language backend.
//!
//! Works with any API exposing `/chat/completions`, `/audio/transcriptions`
//! and `/audio/speech`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{LexiError, Result, ServiceKind};
use crate::services::{
    language_code, CompletionRequest, LanguageModel, SpeechSynthesizer, Transcriber,
};

/// Client for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    transcription_model: String,
    speech_model: String,
    voice: String,
}

impl OpenAiBackend {
    /// Creates a backend from config and an API key.
    #[must_use]
    pub fn new(client: Client, config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            transcription_model: config.transcription_model.clone(),
            speech_model: config.speech_model.clone(),
            voice: config.voice.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(response: reqwest::Response, service: ServiceKind) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(LexiError::service(service, format!("HTTP {status}: {message}")))
    }
}

fn request_error(service: ServiceKind) -> impl Fn(reqwest::Error) -> LexiError {
    move |e| LexiError::service(service, e.to_string())
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

// ============================================================================
// Capabilities
// ============================================================================

#[async_trait]
impl LanguageModel for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let service = ServiceKind::LanguageModel;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: 0.7,
            response_format: request.json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error(service))?;
        let response = Self::check(response, service).await?;
        let parsed: ChatResponse = response.json().await.map_err(request_error(service))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LexiError::service(service, "response contained no message"))
    }
}

#[async_trait]
impl Transcriber for OpenAiBackend {
    async fn transcribe(&self, audio: Vec<u8>, language: &str) -> Result<String> {
        let service = ServiceKind::Transcription;
        debug!(bytes = audio.len(), language, "Transcribing utterance");

        let file = Part::bytes(audio)
            .file_name("utterance.webm")
            .mime_str("audio/webm")
            .map_err(request_error(service))?;
        let form = Form::new()
            .text("model", self.transcription_model.clone())
            .text("language", language_code(language))
            .part("file", file);

        let response = self
            .client
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(request_error(service))?;
        let response = Self::check(response, service).await?;
        let parsed: TranscriptionResponse =
            response.json().await.map_err(request_error(service))?;

        Ok(parsed.text.trim().to_string())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiBackend {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let service = ServiceKind::SpeechSynthesis;
        let body = SpeechRequest {
            model: &self.speech_model,
            input: text,
            voice: &self.voice,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(self.url("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error(service))?;
        let response = Self::check(response, service).await?;
        let bytes = response.bytes().await.map_err(request_error(service))?;

        Ok(bytes.to_vec())
    }
}
