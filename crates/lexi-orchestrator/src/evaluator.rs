//! Exercise scoring.
//!
//! The evaluator never fails: near-empty input is scored zero without calling
//! the model, and a model failure, timeout, or unparseable reply yields a
//! neutral score of 50.

use std::sync::Arc;
use std::time::Duration;

use lexi_report::ExerciseKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::difficulty::Difficulty;
use crate::error::{LexiError, Result, ServiceKind};
use crate::services::{with_timeout, CompletionRequest, LanguageModel};
use crate::session_state::Evaluation;

/// Minimum number of letters or digits for a response to be scored.
pub const MIN_MEANINGFUL_CHARS: usize = 3;

/// Score recorded when the model could not produce one.
pub const NEUTRAL_SCORE: f64 = 50.0;

const EMPTY_FEEDBACK: &str =
    "No meaningful response was detected, so this exercise was scored zero. Try answering in full sentences.";

const FALLBACK_FEEDBACK: &str =
    "Thanks for your answer. It could not be scored in detail this time, so a neutral score was recorded.";

/// First `{ ... }` block in a model reply, tolerating prose or code fences.
static JSON_OBJECT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").ok());

/// Scores speaking and translation responses with a language model.
#[derive(Clone)]
pub struct ExerciseEvaluator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl std::fmt::Debug for ExerciseEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExerciseEvaluator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Shape of the model's JSON answer. Every field is optional so partial
/// replies can still be checked.
#[derive(Debug, Default, Deserialize)]
struct ModelVerdict {
    #[serde(default)]
    grammar_score: Option<f64>,
    #[serde(default)]
    fluency_score: Option<f64>,
    #[serde(default)]
    accuracy_score: Option<f64>,
    #[serde(default)]
    comprehension_score: Option<f64>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    strengths: Vec<String>,
}

impl ExerciseEvaluator {
    /// Creates an evaluator over `model`, bounding each call by `timeout`.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Scores a spoken answer to `prompt`.
    pub async fn evaluate_speaking(
        &self,
        transcript: &str,
        prompt: &str,
        language: &str,
        difficulty: Difficulty,
    ) -> Evaluation {
        if !is_meaningful(transcript) {
            return empty_evaluation(ExerciseKind::Speaking);
        }

        let request = CompletionRequest::json(
            format!(
                "You are an expert {language} examiner. Score the learner's spoken answer. \
                 Reply with a JSON object containing grammar_score and fluency_score \
                 (numbers from 0 to 100), feedback (one to three sentences in English), \
                 errors (a list of specific mistakes) and strengths (a list)."
            ),
            format!(
                "Difficulty level: {difficulty}/10\nQuestion: {prompt}\nTranscript of the answer: {transcript}"
            ),
        );

        self.score(request, ExerciseKind::Speaking).await
    }

    /// Scores a translation of `source_passage` into `response_language`.
    pub async fn evaluate_translation(
        &self,
        translation: &str,
        source_passage: &str,
        source_language: &str,
        response_language: &str,
        difficulty: Difficulty,
    ) -> Evaluation {
        if !is_meaningful(translation) {
            return empty_evaluation(ExerciseKind::Translation);
        }

        let request = CompletionRequest::json(
            format!(
                "You are an expert {source_language} to {response_language} translation examiner. \
                 Score the learner's translation. Reply with a JSON object containing \
                 accuracy_score, grammar_score and comprehension_score (numbers from 0 to 100), \
                 feedback (one to three sentences), errors (a list of specific mistakes) and \
                 strengths (a list)."
            ),
            format!(
                "Difficulty level: {difficulty}/10\nOriginal ({source_language}): {source_passage}\n\
                 Learner translation ({response_language}): {translation}"
            ),
        );

        self.score(request, ExerciseKind::Translation).await
    }

    async fn score(&self, request: CompletionRequest, kind: ExerciseKind) -> Evaluation {
        let reply = with_timeout(
            ServiceKind::LanguageModel,
            self.timeout,
            self.model.complete(request),
        )
        .await;

        match reply.and_then(|text| parse_verdict(&text, kind)) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(error = %e, ?kind, "Evaluation failed, recording neutral score");
                neutral_evaluation(kind)
            }
        }
    }
}

/// Whether `text` has enough letters or digits to be worth scoring.
#[must_use]
pub fn is_meaningful(text: &str) -> bool {
    text.chars().filter(|c| c.is_alphanumeric()).count() >= MIN_MEANINGFUL_CHARS
}

fn empty_evaluation(kind: ExerciseKind) -> Evaluation {
    debug!(?kind, "Response too short, scoring zero");
    scored(kind, 0.0, EMPTY_FEEDBACK)
}

fn neutral_evaluation(kind: ExerciseKind) -> Evaluation {
    scored(kind, NEUTRAL_SCORE, FALLBACK_FEEDBACK)
}

fn scored(kind: ExerciseKind, score: f64, feedback: &str) -> Evaluation {
    match kind {
        ExerciseKind::Speaking => Evaluation {
            grammar_score: Some(score),
            fluency_score: Some(score),
            feedback: feedback.to_string(),
            ..Evaluation::default()
        },
        ExerciseKind::Translation => Evaluation {
            grammar_score: Some(score),
            accuracy_score: Some(score),
            comprehension_score: Some(score),
            feedback: feedback.to_string(),
            ..Evaluation::default()
        },
    }
}

fn clamp_score(score: Option<f64>) -> Option<f64> {
    score
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(0.0, 100.0))
}

/// Parses a model reply into an evaluation carrying every score `kind` needs.
fn parse_verdict(reply: &str, kind: ExerciseKind) -> Result<Evaluation> {
    let object = JSON_OBJECT
        .as_ref()
        .and_then(|re| re.find(reply))
        .ok_or_else(|| LexiError::service(ServiceKind::LanguageModel, "reply contained no JSON object"))?;
    let verdict: ModelVerdict = serde_json::from_str(object.as_str())?;

    let grammar_score = clamp_score(verdict.grammar_score);
    let feedback = verdict
        .feedback
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| "Scored.".to_string());

    let evaluation = match kind {
        ExerciseKind::Speaking => Evaluation {
            grammar_score,
            fluency_score: clamp_score(verdict.fluency_score),
            feedback,
            errors: verdict.errors,
            strengths: verdict.strengths,
            ..Evaluation::default()
        },
        ExerciseKind::Translation => {
            let accuracy_score = clamp_score(verdict.accuracy_score);
            Evaluation {
                grammar_score,
                accuracy_score,
                comprehension_score: clamp_score(verdict.comprehension_score).or(accuracy_score),
                feedback,
                errors: verdict.errors,
                strengths: verdict.strengths,
                ..Evaluation::default()
            }
        }
    };

    if evaluation.is_complete_for(kind) {
        Ok(evaluation)
    } else {
        Err(LexiError::service(
            ServiceKind::LanguageModel,
            "reply is missing required scores",
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    fn evaluator(model: ScriptedModel) -> ExerciseEvaluator {
        ExerciseEvaluator::new(Arc::new(model), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_short_transcript_scores_zero_without_calling_model() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let calls = model.calls();
        let evaluator = evaluator(model);

        for input in ["", "  ", "ok", "a.b", "¿?¡!"] {
            let evaluation = evaluator
                .evaluate_speaking(input, "Describe your day.", "Spanish", Difficulty::new(3))
                .await;
            assert_eq!(evaluation.grammar_score, Some(0.0), "input {input:?}");
            assert_eq!(evaluation.fluency_score, Some(0.0));
            assert_eq!(evaluation.feedback, EMPTY_FEEDBACK);
        }

        let translation = evaluator
            .evaluate_translation("x", "El gato.", "Spanish", "English", Difficulty::new(3))
            .await;
        assert_eq!(translation.accuracy_score, Some(0.0));
        assert_eq!(translation.comprehension_score, Some(0.0));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_speaking_scores_from_model_reply() {
        let evaluator = evaluator(ScriptedModel::new([
            r#"Here you go: {"grammar_score": 82, "fluency_score": 77.5, "feedback": "Nice.", "errors": ["'yo es' should be 'yo soy'"], "strengths": ["Good pace"]}"#,
        ]));

        let evaluation = evaluator
            .evaluate_speaking("Yo es estudiante de medicina.", "Who are you?", "Spanish", Difficulty::new(2))
            .await;

        assert_eq!(evaluation.grammar_score, Some(82.0));
        assert_eq!(evaluation.fluency_score, Some(77.5));
        assert_eq!(evaluation.feedback, "Nice.");
        assert_eq!(evaluation.errors.len(), 1);
        assert_eq!(evaluation.strengths, vec!["Good pace".to_string()]);
        assert!(evaluation.accuracy_score.is_none());
    }

    #[tokio::test]
    async fn test_translation_comprehension_defaults_to_accuracy() {
        let evaluator = evaluator(ScriptedModel::new([
            "```json\n{\"accuracy_score\": 91, \"grammar_score\": 88, \"feedback\": \"Accurate.\"}\n```",
        ]));

        let evaluation = evaluator
            .evaluate_translation("The cat is black.", "El gato es negro.", "Spanish", "English", Difficulty::new(1))
            .await;

        assert_eq!(evaluation.accuracy_score, Some(91.0));
        assert_eq!(evaluation.grammar_score, Some(88.0));
        assert_eq!(evaluation.comprehension_score, Some(91.0));
        assert!(evaluation.fluency_score.is_none());
    }

    #[tokio::test]
    async fn test_scores_are_clamped() {
        let evaluator = evaluator(ScriptedModel::new([
            r#"{"grammar_score": 140, "fluency_score": -3, "feedback": "?"}"#,
        ]));

        let evaluation = evaluator
            .evaluate_speaking("Hablo mucho.", "Talk.", "Spanish", Difficulty::new(3))
            .await;

        assert_eq!(evaluation.grammar_score, Some(100.0));
        assert_eq!(evaluation.fluency_score, Some(0.0));
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back_to_neutral() {
        let evaluator = evaluator(ScriptedModel::new(["I think it was quite good!"]));

        let evaluation = evaluator
            .evaluate_speaking("Me gusta el fútbol.", "Hobbies?", "Spanish", Difficulty::new(3))
            .await;

        assert_eq!(evaluation.grammar_score, Some(NEUTRAL_SCORE));
        assert_eq!(evaluation.fluency_score, Some(NEUTRAL_SCORE));
        assert_eq!(evaluation.feedback, FALLBACK_FEEDBACK);
    }

    #[tokio::test]
    async fn test_missing_required_score_falls_back_to_neutral() {
        let evaluator = evaluator(ScriptedModel::new([r#"{"accuracy_score": 80}"#]));

        let evaluation = evaluator
            .evaluate_translation("The dog runs.", "El perro corre.", "Spanish", "English", Difficulty::new(3))
            .await;

        assert_eq!(evaluation.accuracy_score, Some(NEUTRAL_SCORE));
        assert_eq!(evaluation.grammar_score, Some(NEUTRAL_SCORE));
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_to_neutral() {
        let evaluator = evaluator(ScriptedModel::failing());

        let evaluation = evaluator
            .evaluate_speaking("Vivo en Madrid.", "Where do you live?", "Spanish", Difficulty::new(3))
            .await;

        assert!(evaluation.is_complete_for(ExerciseKind::Speaking));
        assert_eq!(evaluation.grammar_score, Some(NEUTRAL_SCORE));
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_neutral() {
        let evaluator = ExerciseEvaluator::new(
            Arc::new(ScriptedModel::new(["{}"]).with_delay(Duration::from_secs(5))),
            Duration::from_millis(20),
        );

        let evaluation = evaluator
            .evaluate_speaking("Vivo en Madrid.", "Where do you live?", "Spanish", Difficulty::new(3))
            .await;

        assert_eq!(evaluation.fluency_score, Some(NEUTRAL_SCORE));
    }

    #[test]
    fn test_is_meaningful() {
        assert!(!is_meaningful("hi"));
        assert!(is_meaningful("hey"));
        assert!(is_meaningful("日本語"));
        assert!(!is_meaningful(" . , ! "));
    }
}
