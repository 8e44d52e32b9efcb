use std::sync::Arc;

use clap::Args;
use flightdeck_saga::{FailureKind, FlightDebugInfo, FlightId, FlightStatus, WorkingMap};

use super::{job_service, open_store};
use crate::cloud::{CREATE_WORKSPACE, InMemoryCloud, WorkspaceSummary};
use crate::config::Config;
use crate::error::{CliError, Result};

#[derive(Args)]
pub(crate) struct ProvisionArgs {
    /// Name of the workspace to provision
    workspace: String,

    /// Make the step at this position fail fatally
    #[arg(long, value_name = "INDEX")]
    fail_at: Option<usize>,

    /// Make the undo of the step at this position fail fatally
    #[arg(long, value_name = "INDEX")]
    fatal_undo: Option<usize>,
}

impl ProvisionArgs {
    fn debug_info(&self) -> FlightDebugInfo {
        let mut debug = FlightDebugInfo::default();
        if let Some(index) = self.fail_at {
            debug = debug.fail_do(index, FailureKind::Fatal);
        }
        if let Some(index) = self.fatal_undo {
            debug = debug.fail_undo(index, FailureKind::Fatal);
        }
        debug
    }
}

pub(crate) fn run(args: &ProvisionArgs, config: &Config) -> Result<()> {
    let cloud = Arc::new(InMemoryCloud::default());
    let service = job_service(config, Arc::clone(&cloud))?;

    let input = WorkingMap::new().with("workspace", &args.workspace)?;
    let id = service.submit_with_debug(
        FlightId::generate(),
        CREATE_WORKSPACE,
        input,
        args.debug_info(),
    )?;
    println!("Submitted flight {id}");

    let result = service.await_result(&id)?;
    let record = open_store(config)?.load(&id)?;
    let status = result.status();
    if status == FlightStatus::Success {
        let summary: WorkspaceSummary = result.into_value()?;
        println!("Workspace '{}' provisioned", args.workspace);
        println!("  project:  {}", summary.project);
        println!("  bucket:   {}", summary.bucket);
        println!("  identity: {}", summary.identity);
    } else {
        if let Err(err) = result.outcome() {
            println!("Provisioning failed: {err}");
            let mut source = std::error::Error::source(err);
            while let Some(cause) = source {
                println!("  caused by: {cause}");
                source = cause.source();
            }
        }
        if status == FlightStatus::Fatal {
            println!("Rollback is incomplete; manual cleanup is required.");
        }
    }
    println!();
    println!("{}", record.audit().summary());

    if status == FlightStatus::Success {
        Ok(())
    } else {
        Err(CliError::FlightUnsuccessful { id, status })
    }
}
