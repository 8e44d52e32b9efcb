use std::time::Duration;

use flightdeck_flow::FlowError;
use flightdeck_saga::{FlightError, FlightId, SagaError, StoreError, WorkingMapError};
use thiserror::Error;

/// Error raised by a flight factory while turning input into a definition.
///
/// Anything a factory reports here is a construction error: the flight is not
/// created and no step runs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("invalid flight input")]
    Input(#[from] WorkingMapError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Flight(#[from] FlightError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobError {
    #[error("a job with id '{0}' already exists")]
    DuplicateJobId(FlightId),

    #[error("job '{0}' not found")]
    JobNotFound(FlightId),

    #[error("job '{id}' did not finish within {timeout:?}")]
    Timeout { id: FlightId, timeout: Duration },

    #[error("no flight factory is registered for '{0}'")]
    UnknownFlightType(String),

    #[error("factory for '{registered}' built a flight of type '{built}'")]
    FactoryMismatch { registered: String, built: String },

    #[error("failed to build flight '{flight_type}'")]
    Build {
        flight_type: String,
        #[source]
        source: BuildError,
    },

    #[error("job '{id}' failed")]
    FlightFailed {
        id: FlightId,
        #[source]
        source: SagaError,
    },

    #[error("job '{id}' succeeded without a result")]
    NoResult { id: FlightId },

    #[error("result of job '{id}' has an unexpected shape")]
    Decode {
        id: FlightId,
        #[source]
        source: serde_json::Error,
    },

    #[error("runner for job '{id}' stopped before the flight finished: {reason}")]
    Interrupted { id: FlightId, reason: String },

    #[error("failed to start a runner thread")]
    Spawn(#[source] std::io::Error),

    #[error("failed to open claim directory '{}'", path.display())]
    ClaimStore {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Flight(#[from] FlightError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Map store errors about a specific flight onto job errors.
    pub(crate) fn from_store(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::JobNotFound(id),
            StoreError::DuplicateFlight(id) => Self::DuplicateJobId(id),
            other => Self::Store(other),
        }
    }

    pub(crate) fn from_flight(error: FlightError) -> Self {
        match error {
            FlightError::Store(store) => Self::from_store(store),
            other => Self::Flight(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
