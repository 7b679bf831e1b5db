//! Agent configuration types shared by the engines and the config loader.

use serde::{Deserialize, Serialize};

/// Default bound on reason-then-act rounds.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Default replan budget for plan-and-execute runs.
pub const DEFAULT_MAX_REPLANS: u32 = 2;

/// What a tool loop reports when it runs out of iterations while the model
/// is still requesting tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Return the last assistant message as the answer, status `Completed`.
    #[default]
    BestEffort,
    /// Return the last assistant message, status `Inconclusive`.
    Inconclusive,
}
