use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::FlightAuditLog;
use crate::debug::FlightDebugInfo;
use crate::error::{CompensationError, FlightFailure, SagaError, WorkingMapError};
use crate::retry::RetryPolicy;
use crate::step::Step;
use crate::working_map::WorkingMap;

/// Identifier of one flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightId(String);

impl FlightId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random (UUID v4) id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlightId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for FlightId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Direction the executor is moving through the step list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Compensate,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Compensate => f.write_str("compensate"),
        }
    }
}

/// Lifecycle status of a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    /// A step is executing, forward or backward.
    Running,
    /// A step hit a retryable failure and is waiting for its next attempt.
    WaitingRetry,
    /// Every forward step completed.
    Success,
    /// A step failed and every completed step was compensated.
    Error,
    /// A compensation failed; rollback is incomplete.
    Fatal,
}

impl FlightStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingRetry => "waiting_retry",
            Self::Success => "success",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Fatal)
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`FlightStatus`] from its string form.
#[derive(Debug, thiserror::Error)]
#[error("unknown flight status '{0}' (expected running, waiting_retry, success, error or fatal)")]
pub struct ParseStatusError(String);

impl FromStr for FlightStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "waiting_retry" | "waiting-retry" => Ok(Self::WaitingRetry),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

pub(crate) struct FlightStep {
    pub(crate) step: Box<dyn Step>,
    pub(crate) retry: RetryPolicy,
}

/// An ordered list of steps, each with its retry policy, ready to run.
///
/// A definition holds no execution state and is rebuilt from the flight's
/// input parameters whenever a flight is started or resumed.
pub struct FlightDefinition {
    flight_type: String,
    steps: Vec<FlightStep>,
    result_key: Option<String>,
}

impl FlightDefinition {
    pub(crate) fn new(
        flight_type: String,
        steps: Vec<FlightStep>,
        result_key: Option<String>,
    ) -> Self {
        Self {
            flight_type,
            steps,
            result_key,
        }
    }

    #[must_use]
    pub fn flight_type(&self) -> &str {
        &self.flight_type
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.name()).collect()
    }

    #[must_use]
    pub fn retry_policy(&self, index: usize) -> Option<&RetryPolicy> {
        self.steps.get(index).map(|s| &s.retry)
    }

    /// Working Map key whose value becomes the flight's result.
    #[must_use]
    pub fn result_key(&self) -> Option<&str> {
        self.result_key.as_deref()
    }

    pub(crate) fn step(&self, index: usize) -> Option<&FlightStep> {
        self.steps.get(index)
    }
}

impl fmt::Debug for FlightDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightDefinition")
            .field("flight_type", &self.flight_type)
            .field("steps", &self.step_names())
            .field("result_key", &self.result_key)
            .finish()
    }
}

/// Durable state of one flight.
///
/// Created on submission and mutated only by the executor. It records enough
/// to continue the flight after a restart: direction, how many steps have
/// completed (and not yet been undone), the Working Map and any failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    pub(crate) id: FlightId,
    pub(crate) flight_type: String,
    pub(crate) status: FlightStatus,
    pub(crate) direction: Direction,
    pub(crate) completed_steps: usize,
    pub(crate) step_count: usize,
    pub(crate) input: WorkingMap,
    pub(crate) working_map: WorkingMap,
    pub(crate) result_key: Option<String>,
    pub(crate) failure: Option<FlightFailure>,
    pub(crate) compensation_failure: Option<CompensationError>,
    pub(crate) audit: FlightAuditLog,
    #[serde(default)]
    pub(crate) debug: FlightDebugInfo,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl FlightRecord {
    pub(crate) fn new(
        id: FlightId,
        definition: &FlightDefinition,
        input: WorkingMap,
        debug: FlightDebugInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            flight_type: definition.flight_type().to_string(),
            status: FlightStatus::Running,
            direction: Direction::Forward,
            completed_steps: 0,
            step_count: definition.len(),
            input,
            working_map: WorkingMap::new(),
            result_key: definition.result_key().map(str::to_string),
            failure: None,
            compensation_failure: None,
            audit: FlightAuditLog::new(),
            debug,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn finish(&mut self, status: FlightStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    #[must_use]
    pub fn id(&self) -> &FlightId {
        &self.id
    }

    #[must_use]
    pub fn flight_type(&self) -> &str {
        &self.flight_type
    }

    #[must_use]
    pub fn status(&self) -> FlightStatus {
        self.status
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Steps whose forward action succeeded and that have not been compensated.
    #[must_use]
    pub fn completed_steps(&self) -> usize {
        self.completed_steps
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    #[must_use]
    pub fn input(&self) -> &WorkingMap {
        &self.input
    }

    #[must_use]
    pub fn working_map(&self) -> &WorkingMap {
        &self.working_map
    }

    /// The forward failure that triggered compensation.
    #[must_use]
    pub fn failure(&self) -> Option<&FlightFailure> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn compensation_failure(&self) -> Option<&CompensationError> {
        self.compensation_failure.as_ref()
    }

    #[must_use]
    pub fn audit(&self) -> &FlightAuditLog {
        &self.audit
    }

    /// Fault injection still pending for this flight.
    #[must_use]
    pub fn debug_info(&self) -> &FlightDebugInfo {
        &self.debug
    }

    /// Working Map key whose value becomes the flight's result.
    #[must_use]
    pub fn result_key(&self) -> Option<&str> {
        self.result_key.as_deref()
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// The designated result value, once the flight has succeeded.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        if self.status != FlightStatus::Success {
            return None;
        }
        self.result_key
            .as_deref()
            .and_then(|key| self.working_map.get_raw(key))
    }

    /// The designated result value read as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingMapError::TypeMismatch`] if the result cannot be read as `T`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<Option<T>, WorkingMapError> {
        match (self.status, self.result_key.as_deref()) {
            (FlightStatus::Success, Some(key)) => self.working_map.get(key),
            _ => Ok(None),
        }
    }

    /// Terminal outcome: the result on success, the failure otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::StepFailed`] for a cleanly unwound flight,
    /// [`SagaError::CompensationFailed`] when rollback is incomplete and
    /// [`SagaError::NotFinished`] while the flight is still running.
    pub fn outcome(&self) -> Result<Option<&Value>, SagaError> {
        match self.status {
            FlightStatus::Success => Ok(self.result()),
            FlightStatus::Error => {
                let failure = self
                    .failure
                    .clone()
                    .ok_or(SagaError::MissingFailure(self.status))?;
                Err(SagaError::StepFailed { failure })
            }
            FlightStatus::Fatal => {
                match (self.failure.clone(), self.compensation_failure.clone()) {
                    (Some(failure), Some(compensation)) => Err(SagaError::CompensationFailed {
                        failure,
                        compensation,
                    }),
                    _ => Err(SagaError::MissingFailure(self.status)),
                }
            }
            status @ (FlightStatus::Running | FlightStatus::WaitingRetry) => {
                Err(SagaError::NotFinished(status))
            }
        }
    }
}
