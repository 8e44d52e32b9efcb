use std::sync::Arc;

use clap::Args;
use flightdeck_jobs::{ClaimStore, CycleOutcome, FileClaimStore, PeriodicJob};
use flightdeck_saga::FlightStatus;
use tracing::warn;

use super::open_store;
use crate::config::Config;
use crate::error::Result;

const CLEANUP_JOB: &str = "cleanup";

#[derive(Args)]
pub(crate) struct SweepArgs {
    /// Number of back-to-back cycles to attempt
    #[arg(long, default_value_t = 1)]
    cycles: u32,
}

/// Run the cleanup job `--cycles` times in a row against the shared claim
/// directory.
///
/// Only the first cycle of an interval holds the claim, across every process
/// using the same directory; the rest skip.
pub(crate) fn run(args: &SweepArgs, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let claims: Arc<dyn ClaimStore> = Arc::new(FileClaimStore::open(&config.store.claims_dir)?);
    let job = PeriodicJob::new(CLEANUP_JOB, config.cleanup.clone(), claims, move || {
        let stranded = store
            .list()?
            .into_iter()
            .filter(|record| record.status() == FlightStatus::Fatal)
            .inspect(|record| {
                warn!(
                    flight_id = %record.id(),
                    flight_type = record.flight_type(),
                    "flight needs manual cleanup"
                );
            })
            .count();
        println!("Flights needing manual cleanup: {stranded}");
        Ok(())
    });

    for cycle in 1..=args.cycles {
        let outcome = job.run_cycle();
        println!("cycle {cycle}: {}", describe(outcome));
    }
    Ok(())
}

fn describe(outcome: CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Disabled => "disabled",
        CycleOutcome::Skipped => "skipped (claimed within interval)",
        CycleOutcome::Completed => "completed",
        CycleOutcome::Failed => "failed",
        CycleOutcome::Panicked => "panicked",
    }
}
