use tracing::{debug, error, info, warn};

use crate::flight::{Direction, FlightId, FlightRecord, FlightStatus};
use crate::step::StepOutcome;

/// The step the executor is about to run or has just run.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo<'a> {
    pub flight_id: &'a FlightId,
    pub flight_type: &'a str,
    pub step: &'a str,
    pub index: usize,
    pub direction: Direction,
    pub attempt: u32,
}

/// Observer of flight execution.
///
/// Hooks are called synchronously on the thread driving the flight and must
/// not block for long. All methods default to doing nothing.
pub trait FlightHook: Send + Sync {
    fn flight_started(&self, _record: &FlightRecord) {}

    fn step_started(&self, _info: &StepInfo<'_>) {}

    fn step_finished(&self, _info: &StepInfo<'_>, _outcome: &StepOutcome) {}

    fn flight_finished(&self, _record: &FlightRecord) {}
}

/// Logs every transition with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl FlightHook for TracingHook {
    fn flight_started(&self, record: &FlightRecord) {
        info!(
            flight_id = %record.id(),
            flight_type = record.flight_type(),
            steps = record.step_count(),
            "flight started"
        );
    }

    fn step_started(&self, info: &StepInfo<'_>) {
        debug!(
            flight_id = %info.flight_id,
            step = info.step,
            index = info.index,
            direction = %info.direction,
            attempt = info.attempt,
            "step started"
        );
    }

    fn step_finished(&self, info: &StepInfo<'_>, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Success => debug!(
                flight_id = %info.flight_id,
                step = info.step,
                index = info.index,
                direction = %info.direction,
                "step succeeded"
            ),
            StepOutcome::RetryableFailure(cause) => warn!(
                flight_id = %info.flight_id,
                step = info.step,
                index = info.index,
                direction = %info.direction,
                attempt = info.attempt,
                error = %cause,
                "step failed with retryable error"
            ),
            StepOutcome::FatalFailure(cause) => warn!(
                flight_id = %info.flight_id,
                step = info.step,
                index = info.index,
                direction = %info.direction,
                attempt = info.attempt,
                error = %cause,
                "step failed with fatal error"
            ),
        }
    }

    fn flight_finished(&self, record: &FlightRecord) {
        match record.status() {
            FlightStatus::Fatal => error!(
                flight_id = %record.id(),
                flight_type = record.flight_type(),
                status = %record.status(),
                "flight finished with incomplete rollback"
            ),
            status => info!(
                flight_id = %record.id(),
                flight_type = record.flight_type(),
                status = %status,
                "flight finished"
            ),
        }
    }
}
