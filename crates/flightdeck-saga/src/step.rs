use serde::{Deserialize, Serialize};

use crate::context::FlightContext;
use crate::error::StepFailure;

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient; reattempted according to the step's retry policy.
    Retryable,
    /// Unrecoverable; triggers compensation of the completed steps.
    Fatal,
}

/// Result of running one direction of a step.
///
/// Steps classify their own failures; the executor never guesses from the
/// error type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum StepOutcome {
    Success,
    RetryableFailure(StepFailure),
    FatalFailure(StepFailure),
}

impl StepOutcome {
    pub fn failure(kind: FailureKind, cause: StepFailure) -> Self {
        match kind {
            FailureKind::Retryable => Self::RetryableFailure(cause),
            FailureKind::Fatal => Self::FatalFailure(cause),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalFailure(StepFailure::new(message))
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::RetryableFailure(StepFailure::new(message))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// An atomic unit of forward work with its compensating action.
///
/// A step is stateless and may be shared by many concurrent flights; all
/// per-execution data lives in the [`FlightContext`]. Both directions must be
/// written explicitly: a step without an undo says so through
/// [`Step::has_compensation`].
///
/// The executor only calls `undo_step` for steps whose `do_step` returned
/// [`StepOutcome::Success`]. After a restart a completed `do_step` may run a
/// second time if its success was not yet persisted, so forward actions should
/// tolerate being repeated.
pub trait Step: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Run the forward action.
    fn do_step(&self, ctx: &mut FlightContext<'_>) -> StepOutcome;

    /// Run the compensating action.
    fn undo_step(&self, ctx: &mut FlightContext<'_>) -> StepOutcome;

    /// Whether `undo_step` does anything. Steps returning `false` are skipped
    /// during compensation.
    fn has_compensation(&self) -> bool {
        true
    }

    /// Human-readable description of what compensation will do.
    fn compensation_description(&self) -> String {
        format!("undo {}", self.name())
    }
}
