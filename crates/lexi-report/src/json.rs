//! JSON rendering of assessment results.
//!
//! This module provides [`JsonGenerator`] for serializing an
//! [`AssessmentResult`] as compact single-line JSON or pretty-printed JSON.
//!
//! # Example
//!
//! ```rust
//! use lexi_report::{aggregate, AssessmentResult, ExerciseScores};
//! use lexi_report::json::JsonGenerator;
//!
//! let report = aggregate(&[ExerciseScores::speaking(75.0, 80.0)]);
//! let result = AssessmentResult::new("asm_1", "French", true, report);
//!
//! let generator = JsonGenerator::new(&result);
//! let compact = generator.generate().unwrap();
//! assert!(compact.contains(r#""proficiency_level":"B2""#));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{AssessmentResult, ReportError, Result};

/// JSON result generator.
pub struct JsonGenerator<'a> {
    result: &'a AssessmentResult,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given result.
    #[must_use]
    pub const fn new(result: &'a AssessmentResult) -> Self {
        Self { result }
    }

    /// Generates compact JSON output (single line, no extra whitespace).
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.result).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON output with indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.result).map_err(ReportError::from)
    }

    /// Writes the JSON result to a file, creating or overwriting it.
    ///
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{aggregate, ExerciseScores, ProficiencyLevel};
    use std::io::Read;

    fn sample_result() -> AssessmentResult {
        let report = aggregate(&[
            ExerciseScores::speaking(90.0, 92.0),
            ExerciseScores::translation(85.0, 88.0),
        ]);
        AssessmentResult::new("asm_42", "Spanish", false, report)
    }

    #[test]
    fn test_generate_compact() {
        let result = sample_result();
        let json = JsonGenerator::new(&result).generate().unwrap();

        assert!(!json.contains('\n'));
        assert!(json.contains(r#""assessment_id":"asm_42""#));
        assert!(json.contains(r#""completed":false"#));
        assert!(json.contains(r#""proficiency_level":"C1""#));
        assert!(json.contains(r#""comprehension_score":85.0"#));
        assert!(json.contains(r#""reading_level":"C1""#));
    }

    #[test]
    fn test_report_without_reading_fields_still_parses() {
        let json = r#"{"overall_score":91.0,"grammar_score":90.0,"fluency_score":92.0,"accuracy_score":null,"proficiency_level":"C2","summary":"","speaking_exercises":1,"reading_exercises":0}"#;
        let report: crate::ProficiencyReport = serde_json::from_str(json).unwrap();

        assert!(report.comprehension_score.is_none());
        assert_eq!(report.reading_level, ProficiencyLevel::Unknown);
    }

    #[test]
    fn test_generate_pretty_parses_back() {
        let result = sample_result();
        let json = JsonGenerator::new(&result).generate_pretty().unwrap();

        assert!(json.contains('\n'));
        let parsed: AssessmentResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.report.proficiency_level, ProficiencyLevel::C1);
        assert_eq!(parsed.report.total_exercises(), 2);
        assert!(!parsed.completed);
    }

    #[test]
    fn test_write_to_file() {
        let result = sample_result();
        let path = std::env::temp_dir().join("lexi_report_json_test.json");

        JsonGenerator::new(&result).write_to_file(&path, true).unwrap();

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.contains("asm_42"));

        std::fs::remove_file(&path).ok();
    }
}
