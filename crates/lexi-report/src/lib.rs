//! Lexi Proficiency Reports
//!
//! This crate turns the scores of completed exercises into a proficiency
//! verdict and renders stored results for humans and machines.
//!
//! # Types
//!
//! - [`ExerciseScores`] - The scores of one exercise, as fed to the aggregator
//! - [`ProficiencyLevel`] - CEFR-style band derived from the overall score
//! - [`ProficiencyReport`] - Aggregated scores, band and performance summary
//! - [`AssessmentResult`] - The persisted result record of one assessment
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Serialize a result as compact or pretty JSON
//! - [`MarkdownGenerator`] - Render a result as a Markdown document
//!
//! # Example
//!
//! ```rust
//! use lexi_report::{aggregate, ExerciseKind, ExerciseScores, ProficiencyLevel};
//!
//! let exercises = vec![ExerciseScores::speaking(90.0, 92.0)];
//! let report = aggregate(&exercises);
//!
//! assert!((report.overall_score - 91.0).abs() < f64::EPSILON);
//! assert_eq!(report.proficiency_level, ProficiencyLevel::C2);
//! assert_eq!(exercises[0].kind, ExerciseKind::Speaking);
//! ```

mod aggregate;
pub mod json;
mod markdown;
mod summary;

pub use aggregate::aggregate;
pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the result to JSON.
    #[error("failed to serialize result: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Exercise input (local copy to avoid a dependency on the orchestrator)
// ============================================================================

/// Kind of exercise a score set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    /// A spoken answer to a conversation prompt.
    Speaking,
    /// A translation of a reading passage.
    Translation,
}

/// Scores of one completed exercise.
///
/// Every score is on a 0-100 scale. Scores that do not apply to the
/// exercise kind are `None` and are left out of every mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExerciseScores {
    /// Which phase produced the exercise.
    pub kind: ExerciseKind,
    /// Grammar score (both kinds).
    pub grammar_score: Option<f64>,
    /// Fluency score (speaking only).
    pub fluency_score: Option<f64>,
    /// Translation accuracy score (translation only).
    pub accuracy_score: Option<f64>,
    /// Reading comprehension score (translation only).
    ///
    /// Reported on its own and left out of [`present_scores`](Self::present_scores),
    /// since it usually mirrors accuracy.
    #[serde(default)]
    pub comprehension_score: Option<f64>,
}

impl ExerciseScores {
    /// Scores of a speaking exercise.
    #[must_use]
    pub const fn speaking(grammar: f64, fluency: f64) -> Self {
        Self {
            kind: ExerciseKind::Speaking,
            grammar_score: Some(grammar),
            fluency_score: Some(fluency),
            accuracy_score: None,
            comprehension_score: None,
        }
    }

    /// Scores of a translation exercise, with comprehension equal to accuracy.
    #[must_use]
    pub const fn translation(accuracy: f64, grammar: f64) -> Self {
        Self {
            kind: ExerciseKind::Translation,
            grammar_score: Some(grammar),
            fluency_score: None,
            accuracy_score: Some(accuracy),
            comprehension_score: Some(accuracy),
        }
    }

    /// Replaces the comprehension score.
    #[must_use]
    pub const fn with_comprehension(mut self, comprehension: f64) -> Self {
        self.comprehension_score = Some(comprehension);
        self
    }

    /// Iterates over the scores present on this exercise.
    pub fn present_scores(&self) -> impl Iterator<Item = f64> {
        [self.grammar_score, self.fluency_score, self.accuracy_score]
            .into_iter()
            .flatten()
            .filter(|score| score.is_finite())
    }
}

// ============================================================================
// ProficiencyLevel
// ============================================================================

/// CEFR-style proficiency band.
///
/// Bands map from the overall score with inclusive lower bounds:
/// `[90,100]` C2, `[80,90)` C1, `[70,80)` B2, `[60,70)` B1, `[50,60)` A2,
/// `[0,50)` A1. `Unknown` is reserved for assessments without any exercise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProficiencyLevel {
    /// No exercise was scored.
    #[default]
    Unknown,
    /// Beginner.
    A1,
    /// Elementary.
    A2,
    /// Intermediate.
    B1,
    /// Upper intermediate.
    B2,
    /// Advanced.
    C1,
    /// Proficient.
    C2,
}

impl ProficiencyLevel {
    /// Maps an overall score to its band.
    ///
    /// # Examples
    ///
    /// ```
    /// use lexi_report::ProficiencyLevel;
    ///
    /// assert_eq!(ProficiencyLevel::from_score(90.0), ProficiencyLevel::C2);
    /// assert_eq!(ProficiencyLevel::from_score(89.9), ProficiencyLevel::C1);
    /// assert_eq!(ProficiencyLevel::from_score(12.0), ProficiencyLevel::A1);
    /// ```
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::C2
        } else if score >= 80.0 {
            Self::C1
        } else if score >= 70.0 {
            Self::B2
        } else if score >= 60.0 {
            Self::B1
        } else if score >= 50.0 {
            Self::A2
        } else {
            Self::A1
        }
    }

    /// Returns the band label, e.g. `"B2"`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }

    /// Returns a one-line description of the band.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Unknown => "Not enough data to determine a level",
            Self::A1 => "Beginner",
            Self::A2 => "Elementary",
            Self::B1 => "Intermediate",
            Self::B2 => "Upper intermediate",
            Self::C1 => "Advanced",
            Self::C2 => "Proficient",
        }
    }
}

impl std::fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ProficiencyReport
// ============================================================================

/// Aggregated verdict over a set of exercises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProficiencyReport {
    /// Mean of every present sub-score across all exercises (0-100).
    pub overall_score: f64,

    /// Mean grammar score, if any exercise carried one.
    pub grammar_score: Option<f64>,

    /// Mean fluency score, if any speaking exercise was completed.
    pub fluency_score: Option<f64>,

    /// Mean translation accuracy, if any translation exercise was completed.
    pub accuracy_score: Option<f64>,

    /// Mean reading comprehension, if any translation exercise was completed.
    #[serde(default)]
    pub comprehension_score: Option<f64>,

    /// Band derived from `overall_score`.
    pub proficiency_level: ProficiencyLevel,

    /// Band for the reading phase alone, from the mean of accuracy and
    /// comprehension. `Unknown` when no translation was scored.
    #[serde(default)]
    pub reading_level: ProficiencyLevel,

    /// Natural-language performance summary.
    pub summary: String,

    /// Number of speaking exercises aggregated.
    pub speaking_exercises: u32,

    /// Number of translation exercises aggregated.
    pub reading_exercises: u32,
}

impl ProficiencyReport {
    /// Total number of exercises aggregated.
    #[must_use]
    pub const fn total_exercises(&self) -> u32 {
        self.speaking_exercises + self.reading_exercises
    }
}

// ============================================================================
// AssessmentResult
// ============================================================================

/// The result record stored for an assessment.
///
/// `completed` is `false` for provisional verdicts saved when a session ended
/// before the reading phase ran out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    /// Identifier of the assessment attempt.
    pub assessment_id: String,

    /// Language under assessment.
    pub target_language: String,

    /// Whether the assessment ran to its normal end.
    pub completed: bool,

    /// Aggregated verdict.
    pub report: ProficiencyReport,

    /// When the verdict was computed.
    pub evaluated_at: DateTime<Utc>,
}

impl AssessmentResult {
    /// Creates a result record stamped with the current time.
    #[must_use]
    pub fn new(
        assessment_id: impl Into<String>,
        target_language: impl Into<String>,
        completed: bool,
        report: ProficiencyReport,
    ) -> Self {
        Self {
            assessment_id: assessment_id.into(),
            target_language: target_language.into(),
            completed,
            report,
            evaluated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
