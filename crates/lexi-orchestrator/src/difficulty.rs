//! Adaptive difficulty control.
//!
//! [`next_difficulty`] is a pure function from the driving score of the last
//! exercise to a step of at most one level. The session applies the step via
//! [`Difficulty::apply`], which keeps the level within `1..=10`.

use serde::{Deserialize, Serialize};

/// Lowest difficulty level.
pub const MIN_DIFFICULTY: u8 = 1;

/// Highest difficulty level.
pub const MAX_DIFFICULTY: u8 = 10;

/// Scores strictly above this step the difficulty up.
pub const RAISE_ABOVE: f64 = 85.0;

/// Scores strictly below this step the difficulty down.
pub const LOWER_BELOW: f64 = 60.0;

/// Exercise difficulty, always within `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    /// Creates a difficulty, clamping the value into range.
    #[must_use]
    pub fn new(level: u8) -> Self {
        Self(level.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY))
    }

    /// Returns the numeric level.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    /// Applies a delta, saturating at the range bounds.
    #[must_use]
    pub fn apply(self, delta: DifficultyDelta) -> Self {
        match delta {
            DifficultyDelta::Down => Self::new(self.0.saturating_sub(1)),
            DifficultyDelta::Hold => self,
            DifficultyDelta::Up => Self::new(self.0.saturating_add(1)),
        }
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        if (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&level) {
            Ok(Self(level))
        } else {
            Err(format!(
                "difficulty {level} is outside {MIN_DIFFICULTY}..={MAX_DIFFICULTY}"
            ))
        }
    }
}

impl From<Difficulty> for u8 {
    fn from(difficulty: Difficulty) -> Self {
        difficulty.0
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A one-level difficulty step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyDelta {
    /// One level easier.
    Down,
    /// Unchanged.
    #[default]
    Hold,
    /// One level harder.
    Up,
}

impl DifficultyDelta {
    /// Signed value of the step.
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        match self {
            Self::Down => -1,
            Self::Hold => 0,
            Self::Up => 1,
        }
    }
}

/// Maps the driving score of the last exercise to the next difficulty step.
///
/// The step is `Hold` whenever moving would leave `1..=10`, so applying the
/// returned delta never needs clamping. Non-finite scores hold.
///
/// # Examples
///
/// ```
/// use lexi_orchestrator::difficulty::{next_difficulty, Difficulty, DifficultyDelta};
///
/// assert_eq!(next_difficulty(Difficulty::new(3), 90.0), DifficultyDelta::Up);
/// assert_eq!(next_difficulty(Difficulty::new(3), 85.0), DifficultyDelta::Hold);
/// assert_eq!(next_difficulty(Difficulty::new(3), 59.9), DifficultyDelta::Down);
/// assert_eq!(next_difficulty(Difficulty::new(10), 99.0), DifficultyDelta::Hold);
/// ```
#[must_use]
pub fn next_difficulty(current: Difficulty, score: f64) -> DifficultyDelta {
    if score > RAISE_ABOVE && current.level() < MAX_DIFFICULTY {
        DifficultyDelta::Up
    } else if score < LOWER_BELOW && current.level() > MIN_DIFFICULTY {
        DifficultyDelta::Down
    } else {
        DifficultyDelta::Hold
    }
}
