use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flight::{FlightId, FlightStatus};

/// Serializable cause of a failed step.
///
/// The display chain of the original error is flattened into strings so that
/// a persisted flight can still report why it failed after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct StepFailure {
    message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl StepFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error and the display text of every error in its source chain.
    #[must_use]
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            causes,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

/// The forward failure that sent a flight into compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("step '{step}' (index {index}) failed")]
pub struct FlightFailure {
    /// Name of the step that failed.
    pub step: String,
    /// Position of the failed step in the flight.
    pub index: usize,
    /// Whether the failure was retryable but the retry policy gave up.
    pub retries_exhausted: bool,
    /// The failure reported by the step.
    #[source]
    pub cause: StepFailure,
}

/// Error from a failed compensation operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("compensation failed for step '{step}': {description}")]
pub struct CompensationError {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Position of that step in the flight.
    pub index: usize,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The underlying failure.
    #[source]
    pub cause: StepFailure,
}

/// Terminal failure of a flight, as seen by whoever asked for its result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError {
    /// A step failed and every compensation succeeded.
    #[error("step '{}' failed", failure.step)]
    StepFailed {
        /// The original forward failure.
        #[source]
        failure: FlightFailure,
    },

    /// A step failed and a compensation failed too; rollback is incomplete.
    #[error("step '{}' failed, and rollback is incomplete: {compensation}", failure.step)]
    CompensationFailed {
        /// The original forward failure.
        failure: FlightFailure,
        /// The compensation that could not be completed.
        #[source]
        compensation: CompensationError,
    },

    /// The flight has not reached a terminal status.
    #[error("flight is still {0}")]
    NotFinished(FlightStatus),

    /// The flight is terminal but its record does not say why it failed.
    #[error("flight ended with status {0} but no failure was recorded")]
    MissingFailure(FlightStatus),
}

/// Error accessing a [`crate::WorkingMap`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkingMapError {
    #[error("working map key '{key}' is absent")]
    Missing { key: String },

    #[error("working map key '{key}' does not hold a value of type {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("value for working map key '{key}' cannot be serialized")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error from a [`crate::FlightStore`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("flight '{0}' already exists")]
    DuplicateFlight(FlightId),

    #[error("flight '{0}' not found")]
    NotFound(FlightId),

    #[error("flight id '{0}' cannot be used as a file name")]
    InvalidId(FlightId),

    #[error("failed to read flight record '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write flight record '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse flight record '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize flight '{id}'")]
    Serialize {
        id: FlightId,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to list flight records in '{path}'")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error that prevents the executor from driving a flight.
///
/// Step failures are not reported here; they drive the flight's status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlightError {
    #[error("flight '{flight_type}' has no steps")]
    EmptyFlight { flight_type: String },

    #[error("flight store error")]
    Store(#[from] StoreError),

    #[error("flight '{id}' has type '{found}' but was resumed as '{expected}'")]
    FlightTypeMismatch {
        id: FlightId,
        expected: String,
        found: String,
    },

    #[error("flight '{id}' was created with {recorded} steps but its definition has {defined}")]
    StepCountMismatch {
        id: FlightId,
        recorded: usize,
        defined: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("bucket create failed")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("quota exceeded")]
    struct Inner;

    #[test]
    fn step_failure_captures_source_chain() {
        let failure = StepFailure::from_error(&Outer(Inner));

        assert_eq!(failure.message(), "bucket create failed");
        assert_eq!(failure.causes(), ["quota exceeded".to_string()]);
    }

    #[test]
    fn step_failure_round_trips_through_json() -> anyhow::Result<()> {
        let failure = StepFailure::from_error(&Outer(Inner));

        let json = serde_json::to_string(&failure)?;
        let restored: StepFailure = serde_json::from_str(&json)?;

        assert_eq!(restored, failure);
        Ok(())
    }

    #[test]
    fn compensation_failed_reports_incomplete_rollback() {
        let err = SagaError::CompensationFailed {
            failure: FlightFailure {
                step: "create_vm".to_string(),
                index: 2,
                retries_exhausted: false,
                cause: StepFailure::new("boom"),
            },
            compensation: CompensationError {
                step: "create_bucket".to_string(),
                index: 1,
                description: "delete bucket".to_string(),
                cause: StepFailure::new("permission denied"),
            },
        };

        let msg = err.to_string();

        assert!(msg.contains("create_vm"));
        assert!(msg.contains("rollback is incomplete"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
