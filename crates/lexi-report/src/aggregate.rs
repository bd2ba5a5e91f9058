//! Proficiency aggregation.

use crate::summary::performance_summary;
use crate::{ExerciseKind, ExerciseScores, ProficiencyLevel, ProficiencyReport};

/// Combines the scores of every completed exercise into one verdict.
///
/// The overall score is the mean of every present sub-score across all
/// exercises. Running it twice over the same slice yields the same report,
/// and an empty slice yields `overall_score = 0` with level `Unknown`.
/// Comprehension only feeds `comprehension_score` and `reading_level`.
pub fn aggregate(exercises: &[ExerciseScores]) -> ProficiencyReport {
    let speaking_exercises = count_kind(exercises, ExerciseKind::Speaking);
    let reading_exercises = count_kind(exercises, ExerciseKind::Translation);

    let overall = mean(exercises.iter().flat_map(ExerciseScores::present_scores));
    let grammar_score = mean(exercises.iter().filter_map(|e| e.grammar_score));
    let fluency_score = mean(exercises.iter().filter_map(|e| e.fluency_score));
    let accuracy_score = mean(exercises.iter().filter_map(|e| e.accuracy_score));
    let comprehension_score = mean(exercises.iter().filter_map(|e| e.comprehension_score));

    let reading_level = if reading_exercises == 0 {
        ProficiencyLevel::Unknown
    } else {
        mean([accuracy_score, comprehension_score].into_iter().flatten())
            .map_or(ProficiencyLevel::Unknown, ProficiencyLevel::from_score)
    };

    let (overall_score, proficiency_level) = overall.map_or((0.0, ProficiencyLevel::Unknown), |score| {
        (score, ProficiencyLevel::from_score(score))
    });

    let mut report = ProficiencyReport {
        overall_score,
        grammar_score,
        fluency_score,
        accuracy_score,
        comprehension_score,
        proficiency_level,
        reading_level,
        summary: String::new(),
        speaking_exercises,
        reading_exercises,
    };
    report.summary = performance_summary(&report);
    report
}

fn count_kind(exercises: &[ExerciseScores], kind: ExerciseKind) -> u32 {
    let count = exercises.iter().filter(|e| e.kind == kind).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Arithmetic mean of the finite values, `None` when there are none.
#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0_f64, 0_usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
