mod jobs;
mod provision;
mod sweep;

use std::sync::Arc;

use clap::Subcommand;
use flightdeck_jobs::{FlightFactories, JobService};
use flightdeck_saga::{FileFlightStore, FlightExecutor, FlightStore, TracingHook};

use crate::cloud::{CREATE_WORKSPACE, InMemoryCloud, create_workspace_factory};
use crate::config::Config;
use crate::error::Result;

pub(crate) use jobs::JobsCommand;

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Provision a workspace: project, bucket, identity and bucket role
    Provision(provision::ProvisionArgs),
    /// Inspect recorded flights
    #[command(subcommand)]
    Jobs(JobsCommand),
    /// Run the claim-guarded cleanup job
    Sweep(sweep::SweepArgs),
}

impl Commands {
    pub(crate) fn execute(self, config: &Config) -> Result<()> {
        match self {
            Self::Provision(args) => provision::run(&args, config),
            Self::Jobs(command) => jobs::run(&command, config),
            Self::Sweep(args) => sweep::run(&args, config),
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn FlightStore>> {
    Ok(Arc::new(FileFlightStore::open(config.store.dir.clone())?))
}

/// A job service over the configured store with every known flight type.
fn job_service(config: &Config, cloud: Arc<InMemoryCloud>) -> Result<JobService> {
    let executor = FlightExecutor::new(open_store(config)?).with_hook(Arc::new(TracingHook));
    let factories = FlightFactories::new().with(CREATE_WORKSPACE, create_workspace_factory(cloud));
    Ok(JobService::new(executor, factories, config.jobs.clone()))
}
