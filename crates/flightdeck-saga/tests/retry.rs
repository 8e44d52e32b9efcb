//! Integration tests for retry policies driving retryable failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use flightdeck_saga::{
    FailureKind, FlightBuilder, FlightContext, FlightDebugInfo, FlightExecutor, FlightId,
    FlightStatus, InMemoryFlightStore, RetryPolicy, Step, StepOutcome, StepStatus, WorkingMap,
};

/// Fails with a retryable error until it has been called `succeed_on` times.
struct Flaky {
    succeed_on: u32,
    calls: Arc<AtomicU32>,
    undos: Arc<AtomicU32>,
}

impl Flaky {
    fn new(succeed_on: u32) -> Self {
        Self {
            succeed_on,
            calls: Arc::new(AtomicU32::new(0)),
            undos: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Step for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn do_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.succeed_on {
            StepOutcome::Success
        } else {
            StepOutcome::retryable("service unavailable")
        }
    }

    fn undo_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome {
        self.undos.fetch_add(1, Ordering::SeqCst);
        StepOutcome::Success
    }
}

/// Undo fails with a retryable error until it has been called `succeed_on` times.
struct FlakyUndo {
    succeed_on: u32,
    undos: Arc<AtomicU32>,
}

impl Step for FlakyUndo {
    fn name(&self) -> &str {
        "flaky_undo"
    }

    fn do_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome {
        StepOutcome::Success
    }

    fn undo_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome {
        let call = self.undos.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.succeed_on {
            StepOutcome::Success
        } else {
            StepOutcome::retryable("lock held")
        }
    }
}

struct Fatal;

impl Step for Fatal {
    fn name(&self) -> &str {
        "fatal"
    }

    fn do_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome {
        StepOutcome::fatal("bad request")
    }

    fn undo_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome {
        StepOutcome::Success
    }
}

const QUICK: Duration = Duration::from_millis(1);

fn executor() -> FlightExecutor {
    FlightExecutor::new(Arc::new(InMemoryFlightStore::new()))
}

#[test]
fn retryable_failure_is_retried_until_success() -> anyhow::Result<()> {
    let step = Flaky::new(3);
    let calls = Arc::clone(&step.calls);
    let definition = FlightBuilder::new("flaky")
        .then_with_retry(step, RetryPolicy::fixed_interval(QUICK, 5))
        .build()?;

    let record = executor().execute(
        FlightId::new("flaky-ok"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new(),
    )?;

    assert_eq!(record.status(), FlightStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(record.audit().record(0).map(|r| r.attempts), Some(3));
    Ok(())
}

#[test]
fn exhausted_retries_escalate_to_fatal() -> anyhow::Result<()> {
    let first = Flaky::new(1);
    let first_undos = Arc::clone(&first.undos);
    let step = Flaky::new(10);
    let calls = Arc::clone(&step.calls);
    let definition = FlightBuilder::new("exhausted")
        .then(first)
        .then_with_retry(step, RetryPolicy::fixed_interval(QUICK, 2))
        .build()?;

    let record = executor().execute(
        FlightId::new("exhausted"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new(),
    )?;

    assert_eq!(record.status(), FlightStatus::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(first_undos.load(Ordering::SeqCst), 1);
    let failure = record.failure().expect("failure recorded");
    assert!(failure.retries_exhausted);
    assert_eq!(failure.index, 1);
    Ok(())
}

#[test]
fn retryable_failure_without_policy_fails_at_once() -> anyhow::Result<()> {
    let step = Flaky::new(2);
    let calls = Arc::clone(&step.calls);
    let definition = FlightBuilder::new("no_policy").then(step).build()?;

    let record = executor().execute(
        FlightId::new("no-policy"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new(),
    )?;

    assert_eq!(record.status(), FlightStatus::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        record.audit().record(0).map(|r| r.status),
        Some(StepStatus::Failed)
    );
    Ok(())
}

#[test]
fn fatal_failure_is_never_retried() -> anyhow::Result<()> {
    let definition = FlightBuilder::new("fatal")
        .then_with_retry(Fatal, RetryPolicy::fixed_interval(QUICK, 5))
        .build()?;

    let record = executor().execute(
        FlightId::new("fatal"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new(),
    )?;

    assert_eq!(record.status(), FlightStatus::Error);
    assert_eq!(record.audit().record(0).map(|r| r.attempts), Some(1));
    Ok(())
}

#[test]
fn injected_retryable_failure_is_retried_once() -> anyhow::Result<()> {
    let step = Flaky::new(1);
    let calls = Arc::clone(&step.calls);
    let definition = FlightBuilder::new("injected_retry")
        .then_with_retry(step, RetryPolicy::fixed_interval(QUICK, 1))
        .build()?;

    let record = executor().execute(
        FlightId::new("injected-retry"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new().fail_do(0, FailureKind::Retryable),
    )?;

    assert_eq!(record.status(), FlightStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(record.audit().record(0).map(|r| r.attempts), Some(2));
    Ok(())
}

#[test]
fn retryable_undo_is_retried_by_the_step_policy() -> anyhow::Result<()> {
    let undos = Arc::new(AtomicU32::new(0));
    let definition = FlightBuilder::new("undo_retry")
        .then_with_retry(
            FlakyUndo {
                succeed_on: 3,
                undos: Arc::clone(&undos),
            },
            RetryPolicy::fixed_interval(QUICK, 3),
        )
        .then(Fatal)
        .build()?;

    let record = executor().execute(
        FlightId::new("undo-retry"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new(),
    )?;

    assert_eq!(record.status(), FlightStatus::Error);
    assert_eq!(undos.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn exhausted_undo_retries_make_the_flight_fatal() -> anyhow::Result<()> {
    let undos = Arc::new(AtomicU32::new(0));
    let definition = FlightBuilder::new("undo_exhausted")
        .then_with_retry(
            FlakyUndo {
                succeed_on: 10,
                undos: Arc::clone(&undos),
            },
            RetryPolicy::fixed_interval(QUICK, 1),
        )
        .then(Fatal)
        .build()?;

    let record = executor().execute(
        FlightId::new("undo-exhausted"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new(),
    )?;

    assert_eq!(record.status(), FlightStatus::Fatal);
    assert_eq!(undos.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn exponential_backoff_gives_up_after_operation_time() -> anyhow::Result<()> {
    let step = Flaky::new(100);
    let calls = Arc::clone(&step.calls);
    let policy = RetryPolicy::exponential_backoff(
        Duration::from_millis(2),
        Duration::from_millis(8),
        Duration::from_millis(40),
    );
    let definition = FlightBuilder::new("backoff")
        .then_with_retry(step, policy)
        .build()?;

    let record = executor().execute(
        FlightId::new("backoff"),
        &definition,
        WorkingMap::new(),
        FlightDebugInfo::new(),
    )?;

    assert_eq!(record.status(), FlightStatus::Error);
    let calls = calls.load(Ordering::SeqCst);
    assert!(calls > 1);
    assert!(calls < 100);
    Ok(())
}
