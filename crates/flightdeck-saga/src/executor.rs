use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::context::FlightContext;
use crate::debug::FlightDebugInfo;
use crate::error::{CompensationError, FlightError, FlightFailure, StepFailure};
use crate::flight::{Direction, FlightDefinition, FlightId, FlightRecord, FlightStatus, FlightStep};
use crate::hook::{FlightHook, StepInfo};
use crate::step::StepOutcome;
use crate::store::FlightStore;
use crate::working_map::WorkingMap;

/// Why [`FlightExecutor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum RunExit {
    /// The flight reached a terminal status.
    Finished,
    /// The flight asked to be restarted from its saved record
    /// (see [`FlightDebugInfo::restart_each_step`]).
    Yielded,
}

/// Drives flights through the saga state machine.
///
/// Steps run strictly in order. When a step fails fatally, or exhausts its
/// retry policy, the executor turns around and undoes every completed step in
/// reverse order. The flight ends in [`FlightStatus::Error`] when every undo
/// succeeds and in [`FlightStatus::Fatal`] as soon as one of them fails.
///
/// The record is saved after every transition, so a flight interrupted at any
/// point can be continued with [`FlightExecutor::resume`].
pub struct FlightExecutor {
    store: Arc<dyn FlightStore>,
    hooks: Vec<Arc<dyn FlightHook>>,
}

impl FlightExecutor {
    #[must_use]
    pub fn new(store: Arc<dyn FlightStore>) -> Self {
        Self {
            store,
            hooks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn FlightHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn FlightStore> {
        &self.store
    }

    /// Persist a new flight without running it.
    ///
    /// # Errors
    ///
    /// Returns [`FlightError::Store`] if the record cannot be created, for
    /// example because the id is already taken.
    pub fn create(
        &self,
        id: FlightId,
        definition: &FlightDefinition,
        input: WorkingMap,
        debug: FlightDebugInfo,
    ) -> Result<FlightRecord, FlightError> {
        if definition.is_empty() {
            return Err(FlightError::EmptyFlight {
                flight_type: definition.flight_type().to_string(),
            });
        }
        let record = FlightRecord::new(id, definition, input, debug);
        self.store.create(&record)?;
        for hook in &self.hooks {
            hook.flight_started(&record);
        }
        Ok(record)
    }

    /// Create a flight and run it to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the flight cannot be created or its record cannot
    /// be saved. Step failures are not errors; they show in the returned
    /// record's status.
    pub fn execute(
        &self,
        id: FlightId,
        definition: &FlightDefinition,
        input: WorkingMap,
        debug: FlightDebugInfo,
    ) -> Result<FlightRecord, FlightError> {
        let mut record = self.create(id, definition, input, debug)?;
        self.drive(definition, &mut record)?;
        Ok(record)
    }

    /// Load a saved flight and run it to completion.
    ///
    /// A terminal flight is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be loaded or saved, or if it was
    /// created from a different definition.
    pub fn resume(
        &self,
        id: &FlightId,
        definition: &FlightDefinition,
    ) -> Result<FlightRecord, FlightError> {
        let mut record = self.store.load(id)?;
        self.drive(definition, &mut record)?;
        Ok(record)
    }

    fn drive(
        &self,
        definition: &FlightDefinition,
        record: &mut FlightRecord,
    ) -> Result<(), FlightError> {
        while self.run(definition, record)? == RunExit::Yielded {
            debug!(flight_id = %record.id(), "reloading flight after restart point");
            *record = self.store.load(record.id())?;
        }
        Ok(())
    }

    /// Advance `record` until it is terminal or yields.
    ///
    /// # Errors
    ///
    /// Returns an error if `definition` does not match the record or the
    /// record cannot be saved.
    pub fn run(
        &self,
        definition: &FlightDefinition,
        record: &mut FlightRecord,
    ) -> Result<RunExit, FlightError> {
        Self::check_definition(definition, record)?;

        loop {
            if record.is_terminal() {
                return Ok(RunExit::Finished);
            }
            if let Some(status) = Self::settled_status(definition, record) {
                self.finish(record, status)?;
                return Ok(RunExit::Finished);
            }

            match record.direction {
                Direction::Forward => self.forward_step(definition, record)?,
                Direction::Compensate => self.compensate_step(definition, record)?,
            }

            if record.debug.restart_each_step {
                return Ok(RunExit::Yielded);
            }
        }
    }

    fn check_definition(
        definition: &FlightDefinition,
        record: &FlightRecord,
    ) -> Result<(), FlightError> {
        if definition.flight_type() != record.flight_type() {
            return Err(FlightError::FlightTypeMismatch {
                id: record.id().clone(),
                expected: definition.flight_type().to_string(),
                found: record.flight_type().to_string(),
            });
        }
        if definition.len() != record.step_count() {
            return Err(FlightError::StepCountMismatch {
                id: record.id().clone(),
                recorded: record.step_count(),
                defined: definition.len(),
            });
        }
        Ok(())
    }

    /// The terminal status the record has reached without being marked so.
    fn settled_status(definition: &FlightDefinition, record: &FlightRecord) -> Option<FlightStatus> {
        match record.direction {
            Direction::Forward => (record.completed_steps == definition.len()
                && !record.debug.last_step_failure)
                .then_some(FlightStatus::Success),
            Direction::Compensate if record.compensation_failure.is_some() => {
                Some(FlightStatus::Fatal)
            }
            Direction::Compensate => (record.completed_steps == 0).then_some(FlightStatus::Error),
        }
    }

    fn finish(&self, record: &mut FlightRecord, status: FlightStatus) -> Result<(), FlightError> {
        record.finish(status);
        self.store.save(record)?;

        match status {
            FlightStatus::Success => info!(
                flight_id = %record.id(),
                flight_type = record.flight_type(),
                "flight succeeded"
            ),
            FlightStatus::Fatal => error!(
                flight_id = %record.id(),
                flight_type = record.flight_type(),
                failed_step = record.failure.as_ref().map(|f| f.step.as_str()),
                compensation_step = record.compensation_failure.as_ref().map(|c| c.step.as_str()),
                "flight is FATAL: rollback is incomplete and needs manual repair"
            ),
            _ => warn!(
                flight_id = %record.id(),
                flight_type = record.flight_type(),
                failed_step = record.failure.as_ref().map(|f| f.step.as_str()),
                "flight failed and was rolled back"
            ),
        }

        for hook in &self.hooks {
            hook.flight_finished(record);
        }
        Ok(())
    }

    fn step_at<'d>(
        definition: &'d FlightDefinition,
        record: &FlightRecord,
        index: usize,
    ) -> Result<&'d FlightStep, FlightError> {
        definition
            .step(index)
            .ok_or_else(|| FlightError::StepCountMismatch {
                id: record.id().clone(),
                recorded: record.step_count(),
                defined: definition.len(),
            })
    }

    fn save_progress(&self, record: &mut FlightRecord) -> Result<(), FlightError> {
        record.touch();
        self.store.save(record)?;
        Ok(())
    }

    fn forward_step(
        &self,
        definition: &FlightDefinition,
        record: &mut FlightRecord,
    ) -> Result<(), FlightError> {
        let index = record.completed_steps;
        if index == definition.len() {
            return self.inject_last_step_failure(definition, record);
        }

        let flight_step = Self::step_at(definition, record, index)?;
        let name = flight_step.step.name();

        match self.attempt(flight_step, record, index, Direction::Forward)? {
            Attempt::Succeeded => {
                record
                    .audit
                    .record_success(index, flight_step.step.compensation_description());
                record.completed_steps += 1;
                debug!(flight_id = %record.id(), step = name, index, "step completed");
            }
            Attempt::Failed { cause, retryable } => {
                warn!(
                    flight_id = %record.id(),
                    step = name,
                    index,
                    retries_exhausted = retryable,
                    error = %cause,
                    "step failed, compensating completed steps"
                );
                record.audit.record_failure(index);
                record.failure = Some(FlightFailure {
                    step: name.to_string(),
                    index,
                    retries_exhausted: retryable,
                    cause,
                });
                record.direction = Direction::Compensate;
            }
        }
        self.save_progress(record)
    }

    fn inject_last_step_failure(
        &self,
        definition: &FlightDefinition,
        record: &mut FlightRecord,
    ) -> Result<(), FlightError> {
        let index = definition.len() - 1;
        let name = Self::step_at(definition, record, index)?.step.name();
        warn!(
            flight_id = %record.id(),
            step = name,
            index,
            "injecting failure after the last step"
        );
        record.debug.last_step_failure = false;
        record.failure = Some(FlightFailure {
            step: name.to_string(),
            index,
            retries_exhausted: false,
            cause: StepFailure::new("injected failure after the last step"),
        });
        record.direction = Direction::Compensate;
        self.save_progress(record)
    }

    fn compensate_step(
        &self,
        definition: &FlightDefinition,
        record: &mut FlightRecord,
    ) -> Result<(), FlightError> {
        let Some(index) = record.completed_steps.checked_sub(1) else {
            return Ok(());
        };
        let flight_step = Self::step_at(definition, record, index)?;
        let name = flight_step.step.name();

        if !flight_step.step.has_compensation() {
            debug!(flight_id = %record.id(), step = name, index, "no compensation declared, skipping");
            record.audit.record_skipped(index);
            record.completed_steps = index;
            return self.save_progress(record);
        }

        match self.attempt(flight_step, record, index, Direction::Compensate)? {
            Attempt::Succeeded => {
                record.audit.record_compensated(index);
                record.completed_steps = index;
                debug!(flight_id = %record.id(), step = name, index, "step compensated");
            }
            Attempt::Failed { cause, .. } => {
                let description = flight_step.step.compensation_description();
                error!(
                    flight_id = %record.id(),
                    step = name,
                    index,
                    compensation = %description,
                    error = %cause,
                    "compensation failed, rollback is incomplete"
                );
                record.audit.record_compensation_failed(index);
                record.compensation_failure = Some(CompensationError {
                    step: name.to_string(),
                    index,
                    description,
                    cause,
                });
            }
        }
        self.save_progress(record)
    }

    /// Run one direction of a step, retrying retryable failures while its
    /// policy allows.
    fn attempt(
        &self,
        flight_step: &FlightStep,
        record: &mut FlightRecord,
        index: usize,
        direction: Direction,
    ) -> Result<Attempt, FlightError> {
        let name = flight_step.step.name();
        let started = Instant::now();
        let mut retries = 0_u32;

        loop {
            let attempt = retries + 1;
            record.status = FlightStatus::Running;
            if direction == Direction::Forward {
                record.audit.record_attempt(index, name);
            }
            self.save_progress(record)?;

            let info = StepInfo {
                flight_id: &record.id,
                flight_type: &record.flight_type,
                step: name,
                index,
                direction,
                attempt,
            };
            for hook in &self.hooks {
                hook.step_started(&info);
            }

            let injected = match direction {
                Direction::Forward => record.debug.do_step_failures.remove(&index),
                Direction::Compensate => record.debug.undo_step_failures.remove(&index),
            };
            let outcome = if let Some(kind) = injected {
                StepOutcome::failure(kind, StepFailure::new(format!("injected {direction} failure")))
            } else {
                let mut ctx = FlightContext::new(
                    &record.id,
                    &record.flight_type,
                    &record.input,
                    &mut record.working_map,
                    direction,
                    index,
                    attempt,
                );
                let invoked = panic::catch_unwind(AssertUnwindSafe(|| match direction {
                    Direction::Forward => flight_step.step.do_step(&mut ctx),
                    Direction::Compensate => flight_step.step.undo_step(&mut ctx),
                }));
                invoked.unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(step = name, index, %direction, panic = %message, "step panicked");
                    StepOutcome::FatalFailure(StepFailure::new(format!("step panicked: {message}")))
                })
            };

            let info = StepInfo {
                flight_id: &record.id,
                flight_type: &record.flight_type,
                step: name,
                index,
                direction,
                attempt,
            };
            for hook in &self.hooks {
                hook.step_finished(&info, &outcome);
            }

            let (cause, retryable) = match outcome {
                StepOutcome::Success => return Ok(Attempt::Succeeded),
                StepOutcome::RetryableFailure(cause) => (cause, true),
                StepOutcome::FatalFailure(cause) => (cause, false),
            };

            let delay = if retryable {
                flight_step.retry.next_delay(retries, started.elapsed())
            } else {
                None
            };
            let Some(delay) = delay else {
                return Ok(Attempt::Failed { cause, retryable });
            };

            warn!(
                flight_id = %record.id(),
                step = name,
                index,
                %direction,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %cause,
                "step failed, retrying"
            );
            record.status = FlightStatus::WaitingRetry;
            self.save_progress(record)?;
            thread::sleep(delay);
            retries += 1;
        }
    }
}

enum Attempt {
    Succeeded,
    Failed { cause: StepFailure, retryable: bool },
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
