//! Phase state machine and decision policy.
//!
//! [`decide`] is a pure function: given the phase the session is in, how long
//! it has been there, and the driving score of the turn that just finished,
//! it returns the next [`Decision`]. The session applies it. The phase
//! windows are only checked when a turn finishes, so a slow answer can run
//! past a window by at most one turn.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::difficulty::{next_difficulty, Difficulty, DifficultyDelta};
use crate::session_state::Phase;

/// Length of each timed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    /// Speaking window.
    pub speaking: Duration,
    /// Reading window.
    pub reading: Duration,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            speaking: Duration::from_secs(120),
            reading: Duration::from_secs(90),
        }
    }
}

impl PhaseDurations {
    /// Window of a timed phase, `None` for `Intro` and `Complete`.
    #[must_use]
    pub const fn window(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::SpeakingTest => Some(self.speaking),
            Phase::ReadingTest => Some(self.reading),
            Phase::Intro | Phase::Complete => None,
        }
    }
}

/// Inputs to one decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionContext {
    /// Phase the session is in.
    pub phase: Phase,
    /// Time spent in that phase so far.
    pub elapsed: Duration,
    /// Driving score of the turn that just finished, if any.
    pub previous_score: Option<f64>,
    /// Difficulty the finished turn was issued at.
    pub difficulty: Difficulty,
}

/// What the session does after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// Stay in the speaking phase and issue another prompt.
    GiveSpeakingPrompt {
        /// Difficulty step for the next prompt.
        delta: DifficultyDelta,
    },
    /// Stay in the reading phase and issue another passage.
    GiveTranslationPrompt {
        /// Difficulty step for the next passage.
        delta: DifficultyDelta,
    },
    /// Enter the next phase and issue its first task.
    SwitchPhase {
        /// Phase to enter.
        to: Phase,
        /// Difficulty step for the first task of the new phase.
        delta: DifficultyDelta,
    },
    /// Aggregate, persist, and close.
    Conclude,
}

impl Decision {
    /// Short name recorded in the insight log.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GiveSpeakingPrompt { .. } => "give_speaking_prompt",
            Self::GiveTranslationPrompt { .. } => "give_translation_prompt",
            Self::SwitchPhase { .. } => "switch_phase",
            Self::Conclude => "conclude",
        }
    }

    /// Difficulty step carried by the decision.
    #[must_use]
    pub const fn delta(&self) -> DifficultyDelta {
        match self {
            Self::GiveSpeakingPrompt { delta }
            | Self::GiveTranslationPrompt { delta }
            | Self::SwitchPhase { delta, .. } => *delta,
            Self::Conclude => DifficultyDelta::Hold,
        }
    }

    /// Human-readable reason for the decision.
    #[must_use]
    pub fn rationale(&self, ctx: &DecisionContext) -> String {
        let score = ctx
            .previous_score
            .map_or_else(|| "no score".to_string(), |s| format!("score {s:.1}"));
        let step = match self.delta() {
            DifficultyDelta::Up => "raising difficulty",
            DifficultyDelta::Hold => "keeping difficulty",
            DifficultyDelta::Down => "lowering difficulty",
        };
        let elapsed = ctx.elapsed.as_secs();

        match self {
            Self::GiveSpeakingPrompt { .. } => {
                format!("{score} after {elapsed}s of speaking; {step}")
            }
            Self::GiveTranslationPrompt { .. } => {
                format!("{score} after {elapsed}s of reading; {step}")
            }
            Self::SwitchPhase { to, .. } if ctx.phase == Phase::Intro => {
                format!("greeting sent; starting {to}")
            }
            Self::SwitchPhase { to, .. } => {
                format!("{} window used up after {elapsed}s ({score}); moving to {to}, {step}", ctx.phase)
            }
            Self::Conclude => format!("{} finished after {elapsed}s ({score})", ctx.phase),
        }
    }
}

/// Chooses what happens after a turn.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use lexi_orchestrator::difficulty::{Difficulty, DifficultyDelta};
/// use lexi_orchestrator::phase::{decide, Decision, DecisionContext, PhaseDurations};
/// use lexi_orchestrator::Phase;
///
/// let ctx = DecisionContext {
///     phase: Phase::SpeakingTest,
///     elapsed: Duration::from_secs(30),
///     previous_score: Some(92.0),
///     difficulty: Difficulty::new(3),
/// };
/// assert_eq!(
///     decide(&ctx, &PhaseDurations::default()),
///     Decision::GiveSpeakingPrompt { delta: DifficultyDelta::Up }
/// );
/// ```
#[must_use]
pub fn decide(ctx: &DecisionContext, durations: &PhaseDurations) -> Decision {
    let delta = ctx
        .previous_score
        .map_or(DifficultyDelta::Hold, |score| {
            next_difficulty(ctx.difficulty, score)
        });
    let window_elapsed = durations
        .window(ctx.phase)
        .is_some_and(|window| ctx.elapsed >= window);

    match ctx.phase {
        Phase::Intro => Decision::SwitchPhase {
            to: Phase::SpeakingTest,
            delta: DifficultyDelta::Hold,
        },
        Phase::SpeakingTest if window_elapsed => Decision::SwitchPhase {
            to: Phase::ReadingTest,
            delta,
        },
        Phase::SpeakingTest => Decision::GiveSpeakingPrompt { delta },
        Phase::ReadingTest if window_elapsed => Decision::Conclude,
        Phase::ReadingTest => Decision::GiveTranslationPrompt { delta },
        Phase::Complete => Decision::Conclude,
    }
}
