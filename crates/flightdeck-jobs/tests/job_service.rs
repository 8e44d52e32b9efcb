//! Integration tests for submitting, awaiting and recovering jobs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use flightdeck_flow::{Arg, Flow, OperationError, OperationRegistry, OperationSet, value};
use flightdeck_jobs::{
    BuildError, FlightFactories, JobError, JobFilter, JobService, JobsConfig,
};
use flightdeck_saga::{
    FailureKind, FileFlightStore, FlightDebugInfo, FlightDefinition, FlightExecutor, FlightId,
    FlightStatus, FlightStore, InMemoryFlightStore, SagaError, WorkingMap,
};

#[derive(Default)]
struct Counter {
    increments: AtomicUsize,
    fail_on: Option<usize>,
}

impl Counter {
    fn increment(&self, input: i64) -> Result<i64, OperationError> {
        let call = self.increments.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(OperationError::fatal("counter overflow"));
        }
        Ok(input + 2)
    }

    fn decrement(&self, _input: i64) -> Result<(), OperationError> {
        Ok(())
    }

    fn combine(&self, a: i64, _b: i64) -> Result<Vec<i64>, OperationError> {
        Ok(vec![a, a + 1])
    }
}

impl OperationSet for Counter {
    fn register(registry: &mut OperationRegistry<Self>) {
        registry
            .operation("increment", Self::increment)
            .undo_with("decrement");
        registry.undo("decrement", Self::decrement);
        registry.operation("combine", Self::combine).no_undo();
    }
}

/// Holds the flight inside its only step until released.
struct Gate {
    release: Mutex<Receiver<()>>,
}

impl Gate {
    fn pass(&self) -> Result<(), OperationError> {
        self.release
            .lock()
            .map_err(|_| OperationError::fatal("gate poisoned"))?
            .recv()
            .map_err(|_| OperationError::fatal("gate dropped"))
    }
}

impl OperationSet for Gate {
    fn register(registry: &mut OperationRegistry<Self>) {
        registry.operation("pass", Self::pass).no_undo();
    }
}

/// Panics on its only value-producing call.
struct Faulty;

impl Faulty {
    fn explode(&self, input: i64) -> Result<i64, OperationError> {
        let zones: Vec<i64> = Vec::new();
        Ok(zones[usize::try_from(input).unwrap_or(0)])
    }
}

impl OperationSet for Faulty {
    fn register(registry: &mut OperationRegistry<Self>) {
        registry.operation("explode", Self::explode).no_undo();
    }
}

fn chain_factory(
    counter: Arc<Counter>,
    builds: Arc<AtomicUsize>,
) -> impl Fn(&WorkingMap) -> Result<FlightDefinition, BuildError> + Send + Sync + 'static {
    move |input: &WorkingMap| -> Result<FlightDefinition, BuildError> {
        builds.fetch_add(1, Ordering::SeqCst);
        let start: i64 = input.get_required("start")?;
        let mut flow = Flow::new("chain");
        let step1 = flow.step(&counter).call::<_, i64>("increment", value(start))?;
        let step2 = flow.step(&counter).call::<_, i64>("increment", step1)?;
        let step3 = flow
            .step(&counter)
            .call::<_, Vec<i64>>("combine", (Arg::from(step1), Arg::from(step2)))?;
        flow.set_result(&step3)?;
        Ok(flow.build()?)
    }
}

struct Harness {
    service: JobService,
    store: Arc<dyn FlightStore>,
    builds: Arc<AtomicUsize>,
}

fn harness_with(counter: Counter, store: Arc<dyn FlightStore>, config: JobsConfig) -> Harness {
    let builds = Arc::new(AtomicUsize::new(0));
    let factories = FlightFactories::new().with(
        "chain",
        chain_factory(Arc::new(counter), Arc::clone(&builds)),
    );
    let service = JobService::new(FlightExecutor::new(Arc::clone(&store)), factories, config);
    Harness {
        service,
        store,
        builds,
    }
}

fn harness(counter: Counter) -> Harness {
    harness_with(
        counter,
        Arc::new(InMemoryFlightStore::new()),
        JobsConfig::new(10, 5),
    )
}

fn start(value: i64) -> anyhow::Result<WorkingMap> {
    Ok(WorkingMap::new().with("start", &value)?)
}

#[test]
fn submitted_job_succeeds_with_result() -> anyhow::Result<()> {
    let h = harness(Counter::default());

    let id = h.service.submit("chain", start(3)?)?;
    let result = h.service.await_result(&id)?;

    assert_eq!(result.status(), FlightStatus::Success);
    assert_eq!(result.outcome().ok().flatten(), Some(&serde_json::json!([5, 6])));
    let report = h.service.retrieve(&id)?;
    assert_eq!(report.flight_type, "chain");
    assert_eq!(report.completed_steps, 3);
    assert!(report.completed_at.is_some());
    Ok(())
}

#[test]
fn submit_and_wait_decodes_the_result() -> anyhow::Result<()> {
    let h = harness(Counter::default());

    let combined: Vec<i64> = h.service.submit_and_wait("chain", start(10)?)?;

    assert_eq!(combined, [12, 13]);
    Ok(())
}

#[test]
fn failed_job_reports_its_cause() -> anyhow::Result<()> {
    let h = harness(Counter {
        fail_on: Some(2),
        ..Counter::default()
    });

    let err = h
        .service
        .submit_and_wait::<Vec<i64>>("chain", start(3)?)
        .expect_err("second increment fails");

    match err {
        JobError::FlightFailed {
            source: SagaError::StepFailed { failure },
            ..
        } => {
            assert_eq!(failure.index, 1);
            assert_eq!(failure.cause.message(), "counter overflow");
        }
        other => panic!("expected a failed flight, got {other:?}"),
    }
    Ok(())
}

#[test]
fn injected_undo_failure_is_fatal() -> anyhow::Result<()> {
    let h = harness(Counter::default());
    let debug = FlightDebugInfo::default()
        .fail_do(2, FailureKind::Fatal)
        .fail_undo(0, FailureKind::Fatal);

    let id = h
        .service
        .submit_with_debug(FlightId::new("fatal-job"), "chain", start(3)?, debug)?;
    let result = h.service.await_result(&id)?;

    assert_eq!(result.status(), FlightStatus::Fatal);
    assert!(matches!(
        result.outcome(),
        Err(SagaError::CompensationFailed { .. })
    ));
    Ok(())
}

#[test]
fn duplicate_ids_are_rejected() -> anyhow::Result<()> {
    let h = harness(Counter::default());
    let id = FlightId::new("job-1");

    h.service.submit_with_id(id.clone(), "chain", start(1)?)?;
    let err = h
        .service
        .submit_with_id(id.clone(), "chain", start(1)?)
        .expect_err("id taken");

    assert!(matches!(err, JobError::DuplicateJobId(ref taken) if *taken == id));
    h.service.await_result(&id)?;
    Ok(())
}

#[test]
fn construction_errors_create_no_job() -> anyhow::Result<()> {
    let h = harness(Counter::default());

    let unknown = h
        .service
        .submit("teardown", WorkingMap::new())
        .expect_err("unregistered type");
    let bad_input = h
        .service
        .submit("chain", WorkingMap::new())
        .expect_err("start is missing");

    assert!(matches!(unknown, JobError::UnknownFlightType(ref t) if t == "teardown"));
    assert!(matches!(
        bad_input,
        JobError::Build {
            source: BuildError::Input(_),
            ..
        }
    ));
    assert!(h.store.list()?.is_empty());
    Ok(())
}

#[test]
fn unknown_job_is_not_found() {
    let h = harness(Counter::default());
    let id = FlightId::new("nope");

    assert!(matches!(
        h.service.await_result(&id),
        Err(JobError::JobNotFound(ref missing)) if *missing == id
    ));
    assert!(matches!(
        h.service.retrieve(&id),
        Err(JobError::JobNotFound(_))
    ));
}

#[test]
fn await_times_out_while_flight_runs() -> anyhow::Result<()> {
    let (release, gate_rx): (Sender<()>, Receiver<()>) = mpsc::channel();
    let gate = Arc::new(Gate {
        release: Mutex::new(gate_rx),
    });
    let factories = FlightFactories::new().with(
        "gated",
        move |_: &WorkingMap| -> Result<FlightDefinition, BuildError> {
            let mut flow = Flow::new("gated");
            flow.step(&gate).call_unit("pass", ())?;
            Ok(flow.build()?)
        },
    );
    let store: Arc<dyn FlightStore> = Arc::new(InMemoryFlightStore::new());
    let impatient = JobService::new(
        FlightExecutor::new(Arc::clone(&store)),
        factories.clone(),
        JobsConfig::new(0, 5),
    );
    let patient = JobService::new(
        FlightExecutor::new(Arc::clone(&store)),
        factories,
        JobsConfig::new(10, 5),
    );

    let id = impatient.submit("gated", WorkingMap::new())?;
    let err = impatient.await_result(&id).expect_err("still gated");
    assert!(matches!(err, JobError::Timeout { .. }));
    assert_eq!(impatient.retrieve(&id)?.status, FlightStatus::Running);

    release.send(())?;
    assert_eq!(patient.await_result(&id)?.status(), FlightStatus::Success);
    Ok(())
}

#[test]
fn enumerate_lists_newest_first() -> anyhow::Result<()> {
    let h = harness(Counter::default());
    let mut ids = Vec::new();
    for n in 0..4 {
        let id = h
            .service
            .submit_with_id(FlightId::new(format!("job-{n}")), "chain", start(n)?)?;
        h.service.await_result(&id)?;
        ids.push(id);
    }
    let failing = FlightDebugInfo::default().fail_do(0, FailureKind::Fatal);
    let failed = h
        .service
        .submit_with_debug(FlightId::new("job-failed"), "chain", start(0)?, failing)?;
    h.service.await_result(&failed)?;

    let all = h.service.enumerate(&JobFilter::default())?;
    let succeeded = h.service.enumerate(
        &JobFilter::default()
            .with_status(FlightStatus::Success)
            .with_offset(1)
            .with_limit(2),
    )?;
    let errors = h
        .service
        .enumerate(&JobFilter::default().with_status(FlightStatus::Error))?;

    assert_eq!(all.len(), 5);
    assert_eq!(all[0].id, failed);
    assert_eq!(
        succeeded.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        [ids[2].clone(), ids[1].clone()]
    );
    assert_eq!(errors.len(), 1);
    Ok(())
}

#[test]
fn restart_points_rebuild_the_flight() -> anyhow::Result<()> {
    let h = harness(Counter::default());

    let id = h.service.submit_with_debug(
        FlightId::new("restarting"),
        "chain",
        start(3)?,
        FlightDebugInfo::default().restart_each_step(),
    )?;
    let result = h.service.await_result(&id)?;

    assert_eq!(result.status(), FlightStatus::Success);
    assert_eq!(result.into_value::<Vec<i64>>()?, [5, 6]);
    assert!(h.builds.load(Ordering::SeqCst) > 1);
    Ok(())
}

#[test]
fn recover_resumes_unfinished_flights() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store: Arc<dyn FlightStore> = Arc::new(FileFlightStore::open(dir.path())?);
    let counter = Arc::new(Counter::default());
    let definition = chain_factory(Arc::clone(&counter), Arc::new(AtomicUsize::new(0)))(&start(7)?)?;
    FlightExecutor::new(Arc::clone(&store)).create(
        FlightId::new("orphan"),
        &definition,
        start(7)?,
        FlightDebugInfo::default(),
    )?;

    let h = harness_with(Counter::default(), Arc::clone(&store), JobsConfig::new(10, 5));
    let recovered = h.service.recover()?;

    assert_eq!(recovered, [FlightId::new("orphan")]);
    let combined: Vec<i64> = h
        .service
        .await_result(&FlightId::new("orphan"))?
        .into_value()?;
    assert_eq!(combined, [9, 10]);
    assert!(h.service.recover()?.is_empty());
    Ok(())
}

#[test]
fn panicking_step_is_compensated_not_stranded() -> anyhow::Result<()> {
    let counter = Arc::new(Counter::default());
    let faulty = Arc::new(Faulty);
    let undo_counter = Arc::clone(&counter);
    let factories = FlightFactories::new().with(
        "explosive",
        move |input: &WorkingMap| -> Result<FlightDefinition, BuildError> {
            let start: i64 = input.get_required("start")?;
            let mut flow = Flow::new("explosive");
            let created = flow
                .step(&undo_counter)
                .call::<_, i64>("increment", value(start))?;
            flow.step(&faulty).call::<_, i64>("explode", created)?;
            Ok(flow.build()?)
        },
    );
    let service = JobService::new(
        FlightExecutor::new(Arc::new(InMemoryFlightStore::new())),
        factories,
        JobsConfig::new(10, 5),
    );

    let id = service.submit("explosive", start(3)?)?;
    let result = service.await_result(&id)?;

    assert_eq!(result.status(), FlightStatus::Error);
    match result.outcome() {
        Err(SagaError::StepFailed { failure }) => {
            assert_eq!(failure.index, 1);
            assert!(failure.cause.message().starts_with("step panicked"));
        }
        other => panic!("expected a failed flight, got {other:?}"),
    }
    assert_eq!(counter.increments.load(Ordering::SeqCst), 1);
    Ok(())
}
