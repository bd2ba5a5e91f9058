//! Deterministic performance summaries built from score bands.

use crate::ProficiencyReport;

/// Coarse score band shared by every commentary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Excellent,
    Strong,
    Good,
    Adequate,
    Basic,
    Beginner,
}

impl Band {
    fn of(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 80.0 {
            Self::Strong
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 60.0 {
            Self::Adequate
        } else if score >= 50.0 {
            Self::Basic
        } else {
            Self::Beginner
        }
    }
}

fn grammar_commentary(score: Option<f64>) -> &'static str {
    match score.map(Band::of) {
        None => "No grammar scores were recorded.",
        Some(Band::Excellent) => "Grammar is consistently accurate, including complex structures.",
        Some(Band::Strong) => "Grammar is strong with only occasional slips.",
        Some(Band::Good) => {
            "Grammar is generally sound, with recurring errors in more complex sentences."
        }
        Some(Band::Adequate) => {
            "Grammar is adequate for everyday communication, though errors are frequent."
        }
        Some(Band::Basic) => "Grammar is basic and errors often affect clarity.",
        Some(Band::Beginner) => "Grammar needs significant work; most sentences contain errors.",
    }
}

fn fluency_commentary(score: Option<f64>) -> &'static str {
    match score.map(Band::of) {
        None => "Fluency was not assessed because no speaking exercise was completed.",
        Some(Band::Excellent) => "Speech flows naturally with near-native pacing.",
        Some(Band::Strong) => "Speech is fluent with only brief hesitations.",
        Some(Band::Good) => "Speech is mostly fluent, with pauses on harder topics.",
        Some(Band::Adequate) => "Speech is understandable but noticeably hesitant.",
        Some(Band::Basic) => "Speech is halting and relies on short, simple phrases.",
        Some(Band::Beginner) => "Speech is fragmented and hard to follow.",
    }
}

fn reading_commentary(score: Option<f64>) -> Option<&'static str> {
    score.map(|s| match Band::of(s) {
        Band::Excellent => "Translations capture meaning and nuance with near-native accuracy.",
        Band::Strong => "Translations are accurate, missing only subtle nuances.",
        Band::Good => "Translations convey the main ideas with some loss of detail.",
        Band::Adequate => "Translations capture the gist but miss important details.",
        Band::Basic => "Translations show basic comprehension of simple passages.",
        Band::Beginner => "Translations show limited comprehension of the source text.",
    })
}

fn plural(count: u32, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Builds the performance summary for an aggregated report.
///
/// The text depends only on the report's scores and counts.
pub(crate) fn performance_summary(report: &ProficiencyReport) -> String {
    let total = report.total_exercises();
    if total == 0 {
        return "No exercises were completed, so no proficiency level could be determined."
            .to_string();
    }

    let mut sentences = vec![
        grammar_commentary(report.grammar_score),
        fluency_commentary(report.fluency_score),
    ];
    if let Some(reading) = reading_commentary(report.accuracy_score) {
        sentences.push(reading);
    }

    let count = format!(
        "Based on {} ({} speaking, {} reading).",
        plural(total, "exercise"),
        report.speaking_exercises,
        report.reading_exercises
    );

    let mut summary = sentences.join(" ");
    summary.push(' ');
    summary.push_str(&count);
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{aggregate, ExerciseScores};

    #[test]
    fn test_summary_for_single_speaking_exercise() {
        let report = aggregate(&[ExerciseScores::speaking(90.0, 92.0)]);

        insta::assert_snapshot!(
            report.summary,
            @"Grammar is consistently accurate, including complex structures. Speech flows naturally with near-native pacing. Based on 1 exercise (1 speaking, 0 reading)."
        );
    }

    #[test]
    fn test_summary_includes_reading_commentary() {
        let report = aggregate(&[
            ExerciseScores::speaking(65.0, 55.0),
            ExerciseScores::translation(72.0, 68.0),
        ]);

        assert!(report.summary.contains("Translations convey the main ideas"));
        assert!(report.summary.contains("Based on 2 exercises (1 speaking, 1 reading)."));
    }

    #[test]
    fn test_summary_without_speaking_mentions_fluency_gap() {
        let report = aggregate(&[ExerciseScores::translation(40.0, 45.0)]);

        assert!(report
            .summary
            .contains("Fluency was not assessed because no speaking exercise was completed."));
        assert!(report.summary.contains("limited comprehension"));
    }

    #[test]
    fn test_summary_for_no_exercises() {
        let report = aggregate(&[]);
        assert!(report.summary.starts_with("No exercises were completed"));
    }

    #[test]
    fn test_band_thresholds() {
        assert_eq!(Band::of(90.0), Band::Excellent);
        assert_eq!(Band::of(89.99), Band::Strong);
        assert_eq!(Band::of(50.0), Band::Basic);
        assert_eq!(Band::of(49.0), Band::Beginner);
    }
}
