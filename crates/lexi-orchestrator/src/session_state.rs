//! Session state types for the Lexi assessment orchestrator.
//!
//! This module defines the per-assessment snapshot owned by a live session:
//! the phase, the adaptive difficulty, the append-only exercise log, the
//! controller's decision log, and the aggregate verdict once it has run.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lexi_report::{ExerciseKind, ExerciseScores, ProficiencyLevel, ProficiencyReport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::difficulty::{Difficulty, DifficultyDelta};
use crate::error::{LexiError, Result};

/// Current schema version of the persisted snapshot.
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// Phase
// ============================================================================

/// Stage of an assessment.
///
/// Phases advance strictly in declaration order:
/// `Intro` -> `SpeakingTest` -> `ReadingTest` -> `Complete`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Greeting, before the first exercise.
    #[default]
    Intro,
    /// Spoken answers to conversation prompts.
    SpeakingTest,
    /// Translations of reading passages.
    ReadingTest,
    /// Terminal; accepts no further exercises.
    Complete,
}

impl Phase {
    /// The phase that follows this one, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use lexi_orchestrator::Phase;
    ///
    /// assert_eq!(Phase::Intro.next(), Some(Phase::SpeakingTest));
    /// assert_eq!(Phase::Complete.next(), None);
    /// ```
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Intro => Some(Self::SpeakingTest),
            Self::SpeakingTest => Some(Self::ReadingTest),
            Self::ReadingTest => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    /// Returns the wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::SpeakingTest => "speaking_test",
            Self::ReadingTest => "reading_test",
            Self::Complete => "complete",
        }
    }

    /// Exercise kind collected during this phase.
    #[must_use]
    pub const fn exercise_kind(self) -> Option<ExerciseKind> {
        match self {
            Self::SpeakingTest => Some(ExerciseKind::Speaking),
            Self::ReadingTest => Some(ExerciseKind::Translation),
            Self::Intro | Self::Complete => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Exercises
// ============================================================================

/// What the user is asked to do in one exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExerciseTask {
    /// Answer a conversation prompt aloud.
    Speaking {
        /// The question put to the user.
        prompt: String,
    },
    /// Translate a passage out of the target language.
    Translation {
        /// Passage in the target language.
        source_passage: String,
        /// Language of the passage.
        source_language: String,
    },
}

impl ExerciseTask {
    /// Kind of exercise this task produces.
    #[must_use]
    pub const fn kind(&self) -> ExerciseKind {
        match self {
            Self::Speaking { .. } => ExerciseKind::Speaking,
            Self::Translation { .. } => ExerciseKind::Translation,
        }
    }

    /// The prompt or passage text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Speaking { prompt } => prompt,
            Self::Translation { source_passage, .. } => source_passage,
        }
    }
}

/// Scores and feedback the evaluator produced for one response.
///
/// Scores are on a 0-100 scale. Speaking fills `grammar_score` and
/// `fluency_score`; translation fills `accuracy_score`, `grammar_score`
/// and `comprehension_score`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Grammar score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar_score: Option<f64>,
    /// Fluency score (speaking).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fluency_score: Option<f64>,
    /// Translation accuracy score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_score: Option<f64>,
    /// Reading comprehension score (translation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comprehension_score: Option<f64>,
    /// One to three sentences of feedback.
    #[serde(default)]
    pub feedback: String,
    /// Specific mistakes, in the order found.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Things the user did well.
    #[serde(default)]
    pub strengths: Vec<String>,
}

impl Evaluation {
    /// Whether the scores required for `kind` are all present and finite.
    #[must_use]
    pub fn is_complete_for(&self, kind: ExerciseKind) -> bool {
        let finite = |score: Option<f64>| score.is_some_and(f64::is_finite);
        match kind {
            ExerciseKind::Speaking => finite(self.grammar_score) && finite(self.fluency_score),
            ExerciseKind::Translation => finite(self.accuracy_score) && finite(self.grammar_score),
        }
    }

    /// The metric that drives difficulty: grammar for speaking, accuracy for
    /// translation.
    #[must_use]
    pub fn driving_score(&self, kind: ExerciseKind) -> Option<f64> {
        match kind {
            ExerciseKind::Speaking => self.grammar_score,
            ExerciseKind::Translation => self.accuracy_score,
        }
    }
}

/// One scored user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    /// Unique exercise identifier.
    pub id: Uuid,
    /// Difficulty at the time the task was issued.
    pub difficulty_level: Difficulty,
    /// The task the user answered.
    #[serde(flatten)]
    pub task: ExerciseTask,
    /// The user's transcript (speaking) or translation.
    pub response: String,
    /// The evaluator's verdict.
    pub evaluation: Evaluation,
    /// When the exercise was scored.
    pub created_at: DateTime<Utc>,
}

impl Exercise {
    /// Creates a scored exercise with a fresh identifier.
    #[must_use]
    pub fn new(
        task: ExerciseTask,
        difficulty_level: Difficulty,
        response: impl Into<String>,
        evaluation: Evaluation,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            difficulty_level,
            task,
            response: response.into(),
            evaluation,
            created_at,
        }
    }

    /// Kind of this exercise.
    #[must_use]
    pub const fn kind(&self) -> ExerciseKind {
        self.task.kind()
    }

    /// Converts the exercise into aggregator input.
    #[must_use]
    pub fn scores(&self) -> ExerciseScores {
        ExerciseScores {
            kind: self.task.kind(),
            grammar_score: self.evaluation.grammar_score,
            fluency_score: match self.task.kind() {
                ExerciseKind::Speaking => self.evaluation.fluency_score,
                ExerciseKind::Translation => None,
            },
            accuracy_score: match self.task.kind() {
                ExerciseKind::Speaking => None,
                ExerciseKind::Translation => self.evaluation.accuracy_score,
            },
            comprehension_score: match self.task.kind() {
                ExerciseKind::Speaking => None,
                ExerciseKind::Translation => self.evaluation.comprehension_score,
            },
        }
    }
}

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The assessor.
    Ai,
    /// The person being assessed.
    User,
}

/// One line of the conversation as it was sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLine {
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said.
    pub text: String,
    /// When the line was sent.
    pub at: DateTime<Utc>,
}

/// A controller decision recorded for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    /// When the decision was taken.
    pub at: DateTime<Utc>,
    /// Phase the session was in.
    pub phase: Phase,
    /// Short decision name, e.g. `switch_phase`.
    pub decision: String,
    /// Why it was taken.
    pub rationale: String,
    /// Difficulty after the decision was applied.
    pub difficulty: Difficulty,
}

// ============================================================================
// SessionState
// ============================================================================

/// Snapshot of one assessment attempt.
///
/// Owned by exactly one live session; persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Schema version for forward compatibility.
    pub version: u32,

    /// Opaque identifier of the attempt.
    pub assessment_id: String,

    /// Language under assessment.
    pub target_language: String,

    /// Current phase; never regresses.
    pub current_phase: Phase,

    /// Difficulty of the next task.
    pub current_difficulty: Difficulty,

    /// Exercises in the order they were scored.
    #[serde(default)]
    pub exercises_completed: Vec<Exercise>,

    /// Number of speaking exercises in `exercises_completed`.
    #[serde(default)]
    pub speaking_count: u32,

    /// Number of translation exercises in `exercises_completed`.
    #[serde(default)]
    pub reading_count: u32,

    /// When each phase began, set once per phase.
    #[serde(default)]
    pub phase_start_times: BTreeMap<Phase, DateTime<Utc>>,

    /// Mean grammar score, once aggregation has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_grammar_score: Option<f64>,

    /// Mean fluency score, once aggregation has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_fluency_score: Option<f64>,

    /// Overall score, once aggregation has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,

    /// Proficiency band, once aggregation has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proficiency_level: Option<ProficiencyLevel>,

    /// Log of controller decisions.
    #[serde(default)]
    pub insights: Vec<Insight>,

    /// Conversation so far, greeting included.
    #[serde(default)]
    pub history: Vec<TranscriptLine>,

    /// The task the user is currently answering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<ExerciseTask>,

    /// When the session was created.
    pub started_at: DateTime<Utc>,

    /// When the snapshot last changed.
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Creates a fresh session in the `Intro` phase.
    #[must_use]
    pub fn new(
        assessment_id: impl Into<String>,
        target_language: impl Into<String>,
        difficulty: Difficulty,
        now: DateTime<Utc>,
    ) -> Self {
        let mut phase_start_times = BTreeMap::new();
        phase_start_times.insert(Phase::Intro, now);

        Self {
            version: STATE_VERSION,
            assessment_id: assessment_id.into(),
            target_language: target_language.into(),
            current_phase: Phase::Intro,
            current_difficulty: difficulty,
            exercises_completed: Vec::new(),
            speaking_count: 0,
            reading_count: 0,
            phase_start_times,
            overall_grammar_score: None,
            overall_fluency_score: None,
            overall_score: None,
            proficiency_level: None,
            insights: Vec::new(),
            history: Vec::new(),
            current_task: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` once the session has reached `Complete`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_phase == Phase::Complete
    }

    /// Moves to the next phase and stamps its start time.
    ///
    /// # Errors
    ///
    /// Returns `LexiError::InvalidPhaseTransition` unless `to` is the phase
    /// immediately after the current one.
    pub fn advance_phase(&mut self, to: Phase, now: DateTime<Utc>) -> Result<()> {
        if self.current_phase.next() != Some(to) {
            return Err(LexiError::invalid_transition(self.current_phase, to));
        }
        self.current_phase = to;
        self.phase_start_times.entry(to).or_insert(now);
        self.updated_at = now;
        Ok(())
    }

    /// Appends a scored exercise and updates the per-kind counters.
    ///
    /// # Errors
    ///
    /// Returns `LexiError::SessionComplete` once the session is complete, and
    /// `LexiError::IncompleteEvaluation` if the exercise lacks a score its
    /// kind requires.
    pub fn add_exercise(&mut self, exercise: Exercise) -> Result<()> {
        if self.is_complete() {
            return Err(LexiError::session_complete(&self.assessment_id));
        }
        if !exercise.evaluation.is_complete_for(exercise.kind()) {
            return Err(LexiError::incomplete_evaluation(exercise.id));
        }

        match exercise.kind() {
            ExerciseKind::Speaking => self.speaking_count += 1,
            ExerciseKind::Translation => self.reading_count += 1,
        }
        self.updated_at = exercise.created_at;
        self.exercises_completed.push(exercise);
        Ok(())
    }

    /// Applies a difficulty step and returns the new level.
    pub fn apply_difficulty(&mut self, delta: DifficultyDelta) -> Difficulty {
        self.current_difficulty = self.current_difficulty.apply(delta);
        self.current_difficulty
    }

    /// Appends a decision to the insight log.
    pub fn record_insight(
        &mut self,
        decision: impl Into<String>,
        rationale: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.insights.push(Insight {
            at: now,
            phase: self.current_phase,
            decision: decision.into(),
            rationale: rationale.into(),
            difficulty: self.current_difficulty,
        });
        self.updated_at = now;
    }

    /// Time spent in the current phase.
    ///
    /// Zero if the phase has no start time or the clock went backwards.
    #[must_use]
    pub fn phase_elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.phase_start_times
            .get(&self.current_phase)
            .and_then(|start| (now - *start).to_std().ok())
            .unwrap_or_default()
    }

    /// Aggregator input for every completed exercise.
    #[must_use]
    pub fn exercise_scores(&self) -> Vec<ExerciseScores> {
        self.exercises_completed.iter().map(Exercise::scores).collect()
    }

    /// Stores the verdict of an aggregation run.
    pub fn record_aggregate(&mut self, report: &ProficiencyReport, now: DateTime<Utc>) {
        self.overall_grammar_score = report.grammar_score;
        self.overall_fluency_score = report.fluency_score;
        self.overall_score = Some(report.overall_score);
        self.proficiency_level = Some(report.proficiency_level);
        self.updated_at = now;
    }

    /// Prompts and passages already used for exercises of `kind`.
    #[must_use]
    pub fn used_texts(&self, kind: ExerciseKind) -> Vec<String> {
        self.exercises_completed
            .iter()
            .filter(|e| e.kind() == kind)
            .map(|e| e.task.text().to_string())
            .chain(
                self.current_task
                    .iter()
                    .filter(|task| task.kind() == kind)
                    .map(|task| task.text().to_string()),
            )
            .collect()
    }

    /// Appends a line to the conversation history.
    pub fn push_history(&mut self, speaker: Speaker, text: impl Into<String>, now: DateTime<Utc>) {
        self.history.push(TranscriptLine {
            speaker,
            text: text.into(),
            at: now,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
