use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use flightdeck_saga::{
    FlightDebugInfo, FlightDefinition, FlightExecutor, FlightId, FlightRecord, FlightStatus,
    RunExit, SagaError, WorkingMap,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::JobsConfig;
use crate::error::{JobError, Result};
use crate::factory::FlightFactories;

/// Summary of one job, read from its flight record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub id: FlightId,
    pub flight_type: String,
    pub status: FlightStatus,
    pub completed_steps: usize,
    pub step_count: usize,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&FlightRecord> for JobReport {
    fn from(record: &FlightRecord) -> Self {
        Self {
            id: record.id().clone(),
            flight_type: record.flight_type().to_string(),
            status: record.status(),
            completed_steps: record.completed_steps(),
            step_count: record.step_count(),
            submitted_at: record.submitted_at(),
            completed_at: record.completed_at(),
        }
    }
}

/// Terminal state of a job as returned by [`JobService::await_result`].
#[derive(Debug)]
pub struct JobResult {
    report: JobReport,
    outcome: std::result::Result<Option<Value>, SagaError>,
}

impl JobResult {
    fn from_record(record: &FlightRecord) -> Self {
        Self {
            report: JobReport::from(record),
            outcome: record.outcome().map(Option::<&Value>::cloned),
        }
    }

    #[must_use]
    pub fn report(&self) -> &JobReport {
        &self.report
    }

    #[must_use]
    pub fn status(&self) -> FlightStatus {
        self.report.status
    }

    /// The designated result on success, or the failure with its cause.
    ///
    /// # Errors
    ///
    /// Returns the [`SagaError`] of an ERROR or FATAL flight.
    pub fn outcome(&self) -> std::result::Result<Option<&Value>, &SagaError> {
        self.outcome.as_ref().map(Option::as_ref)
    }

    /// Decode the result of a successful job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::FlightFailed`] if the flight did not succeed,
    /// [`JobError::NoResult`] if it has no designated result and
    /// [`JobError::Decode`] if the result is not a `T`.
    pub fn into_value<T: DeserializeOwned>(self) -> Result<T> {
        let id = self.report.id;
        match self.outcome {
            Ok(Some(value)) => {
                serde_json::from_value(value).map_err(|source| JobError::Decode { id, source })
            }
            Ok(None) => Err(JobError::NoResult { id }),
            Err(source) => Err(JobError::FlightFailed { id, source }),
        }
    }
}

/// Which jobs [`JobService::enumerate`] returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<FlightStatus>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl JobFilter {
    #[must_use]
    pub fn with_status(mut self, status: FlightStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Default)]
struct Runners {
    active: HashSet<FlightId>,
    interrupted: HashMap<FlightId, String>,
}

struct Inner {
    executor: FlightExecutor,
    factories: FlightFactories,
    config: JobsConfig,
    runners: Mutex<Runners>,
    finished: Condvar,
}

/// Submits flights and tracks them to completion.
///
/// Every submitted flight runs on its own thread. Construction happens
/// synchronously inside `submit`, so a flight that cannot be built is
/// reported to the caller and never stored.
#[derive(Clone)]
pub struct JobService {
    inner: Arc<Inner>,
}

impl JobService {
    #[must_use]
    pub fn new(executor: FlightExecutor, factories: FlightFactories, config: JobsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                factories,
                config,
                runners: Mutex::new(Runners::default()),
                finished: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn factories(&self) -> &FlightFactories {
        &self.inner.factories
    }

    /// Submit a flight under a freshly generated id.
    ///
    /// # Errors
    ///
    /// Returns a construction error if the flight type is unknown or its
    /// factory fails, or a store error if the flight cannot be recorded.
    pub fn submit(&self, flight_type: &str, input: WorkingMap) -> Result<FlightId> {
        self.submit_with_id(FlightId::generate(), flight_type, input)
    }

    /// Submit a flight under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// As [`JobService::submit`], plus [`JobError::DuplicateJobId`] if the id
    /// is taken.
    pub fn submit_with_id(
        &self,
        id: FlightId,
        flight_type: &str,
        input: WorkingMap,
    ) -> Result<FlightId> {
        self.submit_with_debug(id, flight_type, input, FlightDebugInfo::default())
    }

    /// Submit a flight with fault injection.
    ///
    /// # Errors
    ///
    /// As [`JobService::submit_with_id`].
    pub fn submit_with_debug(
        &self,
        id: FlightId,
        flight_type: &str,
        input: WorkingMap,
        debug: FlightDebugInfo,
    ) -> Result<FlightId> {
        let definition = self.inner.factories.build(flight_type, &input)?;
        self.inner
            .executor
            .create(id.clone(), &definition, input, debug)
            .map_err(JobError::from_flight)?;
        info!(flight_id = %id, flight_type, "job submitted");
        self.start(id.clone(), definition)?;
        Ok(id)
    }

    /// Block until the job is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::JobNotFound`] for an unknown id,
    /// [`JobError::Timeout`] if the job is still running after the configured
    /// timeout and [`JobError::Interrupted`] if its runner died.
    pub fn await_result(&self, id: &FlightId) -> Result<JobResult> {
        let timeout = self.inner.config.await_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.load(id)?;
            if record.is_terminal() {
                return Ok(JobResult::from_record(&record));
            }

            let runners = self.inner.lock_runners();
            if let Some(reason) = runners.interrupted.get(id) {
                return Err(JobError::Interrupted {
                    id: id.clone(),
                    reason: reason.clone(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(JobError::Timeout {
                    id: id.clone(),
                    timeout,
                });
            }
            let wait = self.inner.config.polling_interval().min(deadline - now);
            let _ = self
                .inner
                .finished
                .wait_timeout(runners, wait)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Submit a flight, wait for it and decode its result.
    ///
    /// # Errors
    ///
    /// Any error of [`JobService::submit`], [`JobService::await_result`] or
    /// [`JobResult::into_value`].
    pub fn submit_and_wait<T: DeserializeOwned>(
        &self,
        flight_type: &str,
        input: WorkingMap,
    ) -> Result<T> {
        let id = self.submit(flight_type, input)?;
        self.await_result(&id)?.into_value()
    }

    /// Current state of a job, without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::JobNotFound`] for an unknown id.
    pub fn retrieve(&self, id: &FlightId) -> Result<JobReport> {
        Ok(JobReport::from(&self.load(id)?))
    }

    /// Jobs matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be listed.
    pub fn enumerate(&self, filter: &JobFilter) -> Result<Vec<JobReport>> {
        let records = self.inner.executor.store().list()?;
        Ok(records
            .iter()
            .rev()
            .filter(|record| filter.status.is_none_or(|status| record.status() == status))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(JobReport::from)
            .collect())
    }

    /// Resume every unfinished flight in the store that has no runner yet.
    ///
    /// Flights whose type has no registered factory are left untouched.
    ///
    /// # Errors
    ///
    /// Returns a store error if the records cannot be listed, or an error
    /// starting a runner.
    pub fn recover(&self) -> Result<Vec<FlightId>> {
        let mut resumed = Vec::new();
        for record in self.inner.executor.store().list()? {
            if record.is_terminal() || self.inner.lock_runners().active.contains(record.id()) {
                continue;
            }
            let definition = match self
                .inner
                .factories
                .build(record.flight_type(), record.input())
            {
                Ok(definition) => definition,
                Err(err) => {
                    warn!(
                        flight_id = %record.id(),
                        flight_type = record.flight_type(),
                        error = %err,
                        "cannot recover flight"
                    );
                    continue;
                }
            };
            info!(flight_id = %record.id(), status = %record.status(), "recovering flight");
            self.start(record.id().clone(), definition)?;
            resumed.push(record.id().clone());
        }
        Ok(resumed)
    }

    fn load(&self, id: &FlightId) -> Result<FlightRecord> {
        self.inner
            .executor
            .store()
            .load(id)
            .map_err(JobError::from_store)
    }

    fn start(&self, id: FlightId, definition: FlightDefinition) -> Result<()> {
        {
            let mut runners = self.inner.lock_runners();
            runners.interrupted.remove(&id);
            runners.active.insert(id.clone());
        }
        let inner = Arc::clone(&self.inner);
        let thread_id = id.clone();
        let spawned = thread::Builder::new()
            .name(format!("flight-{id}"))
            .spawn(move || inner.run(&thread_id, definition));
        if let Err(err) = spawned {
            self.inner.lock_runners().active.remove(&id);
            return Err(JobError::Spawn(err));
        }
        Ok(())
    }
}

impl Inner {
    fn lock_runners(&self) -> std::sync::MutexGuard<'_, Runners> {
        self.runners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, id: &FlightId, definition: FlightDefinition) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.drive(id, definition)));
        let interruption = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };
        let mut runners = self.lock_runners();
        runners.active.remove(id);
        if let Some(reason) = interruption {
            error!(flight_id = %id, reason, "flight runner stopped");
            runners.interrupted.insert(id.clone(), reason);
        }
        drop(runners);
        self.finished.notify_all();
    }

    /// Run the flight, rebuilding its steps each time the executor yields.
    fn drive(&self, id: &FlightId, mut definition: FlightDefinition) -> Result<()> {
        loop {
            let mut record = self.executor.store().load(id)?;
            match self.executor.run(&definition, &mut record)? {
                RunExit::Finished => return Ok(()),
                RunExit::Yielded => {
                    debug!(flight_id = %id, "rebuilding flight after restart point");
                    definition = self.factories.build(record.flight_type(), record.input())?;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "step panicked".to_string()
    }
}
