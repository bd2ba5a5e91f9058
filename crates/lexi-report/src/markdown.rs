//! Markdown rendering of assessment results.
//!
//! The generated document contains a title, a summary table of the verdict
//! and scores, and the performance summary text.
//!
//! # Example
//!
//! ```rust
//! use lexi_report::{aggregate, AssessmentResult, ExerciseScores, MarkdownGenerator};
//!
//! let report = aggregate(&[ExerciseScores::speaking(62.0, 58.0)]);
//! let result = AssessmentResult::new("asm_7", "German", true, report);
//!
//! let markdown = MarkdownGenerator::new(&result).generate();
//! assert!(markdown.contains("# Lexi Proficiency Report"));
//! assert!(markdown.contains("| Proficiency | B1 |"));
//! ```

use std::fmt::Write;

use crate::AssessmentResult;

/// Generates Markdown documents from assessment results.
pub struct MarkdownGenerator<'a> {
    result: &'a AssessmentResult,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given result.
    #[must_use]
    pub const fn new(result: &'a AssessmentResult) -> Self {
        Self { result }
    }

    /// Generates the complete Markdown document.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_scores(&mut output);
        self.write_summary(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(output, "# Lexi Proficiency Report");
        let _ = writeln!(output);
        if !self.result.completed {
            let _ = writeln!(
                output,
                "> **Provisional**: the assessment ended before all phases finished."
            );
            let _ = writeln!(output);
        }
    }

    fn write_scores(&self, output: &mut String) {
        let result = self.result;
        let report = &result.report;

        let _ = writeln!(output, "| Field | Value |");
        let _ = writeln!(output, "|-------|-------|");
        let _ = writeln!(output, "| Assessment | `{}` |", result.assessment_id);
        let _ = writeln!(output, "| Language | {} |", result.target_language);
        let _ = writeln!(
            output,
            "| Status | {} |",
            if result.completed { "Completed" } else { "Partial" }
        );
        let _ = writeln!(
            output,
            "| Proficiency | {} |",
            report.proficiency_level.as_str()
        );
        let _ = writeln!(output, "| Overall score | {:.1} |", report.overall_score);
        let _ = writeln!(output, "| Grammar | {} |", format_score(report.grammar_score));
        let _ = writeln!(output, "| Fluency | {} |", format_score(report.fluency_score));
        let _ = writeln!(
            output,
            "| Translation accuracy | {} |",
            format_score(report.accuracy_score)
        );
        let _ = writeln!(
            output,
            "| Reading comprehension | {} |",
            format_score(report.comprehension_score)
        );
        let _ = writeln!(output, "| Reading level | {} |", report.reading_level.as_str());
        let _ = writeln!(
            output,
            "| Exercises | {} ({} speaking, {} reading) |",
            report.total_exercises(),
            report.speaking_exercises,
            report.reading_exercises
        );
        let _ = writeln!(
            output,
            "| Evaluated | {} |",
            result.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(output);
    }

    fn write_summary(&self, output: &mut String) {
        let _ = writeln!(output, "## Summary");
        let _ = writeln!(output);
        let _ = writeln!(output, "{}", self.result.report.summary);
    }
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{s:.1}"))
}
