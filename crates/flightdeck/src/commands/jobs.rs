use std::sync::Arc;

use clap::Subcommand;
use flightdeck_jobs::{JobFilter, JobReport};
use flightdeck_saga::{FlightId, FlightRecord, FlightStatus};

use super::{job_service, open_store};
use crate::cloud::InMemoryCloud;
use crate::config::Config;
use crate::error::Result;

#[derive(Subcommand)]
pub(crate) enum JobsCommand {
    /// List recorded flights, newest first
    List {
        /// Only show flights with this status
        #[arg(long)]
        status: Option<FlightStatus>,

        /// Show at most this many flights
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one flight with its step log
    Show {
        /// Flight id
        id: String,
    },
    /// Resume flights left unfinished by an earlier process
    Recover,
}

pub(crate) fn run(command: &JobsCommand, config: &Config) -> Result<()> {
    match command {
        JobsCommand::List { status, limit } => list(config, *status, *limit),
        JobsCommand::Show { id } => show(config, &FlightId::new(id.as_str())),
        JobsCommand::Recover => recover(config),
    }
}

fn list(config: &Config, status: Option<FlightStatus>, limit: Option<usize>) -> Result<()> {
    let service = job_service(config, Arc::new(InMemoryCloud::default()))?;
    let mut filter = JobFilter::default();
    if let Some(status) = status {
        filter = filter.with_status(status);
    }
    if let Some(limit) = limit {
        filter = filter.with_limit(limit);
    }

    let reports = service.enumerate(&filter)?;
    if reports.is_empty() {
        println!("No flights found.");
        return Ok(());
    }
    for report in &reports {
        print_report_line(report);
    }
    Ok(())
}

fn print_report_line(report: &JobReport) {
    println!(
        "{}  {:<16}  {:<13}  {}/{}  {}",
        report.id,
        report.flight_type,
        report.status.as_str(),
        report.completed_steps,
        report.step_count,
        report.submitted_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn show(config: &Config, id: &FlightId) -> Result<()> {
    let service = job_service(config, Arc::new(InMemoryCloud::default()))?;
    let report = service.retrieve(id)?;
    let record = open_store(config)?.load(id)?;

    println!("Flight {}", report.id);
    println!("  type:      {}", report.flight_type);
    println!("  status:    {}", report.status);
    println!("  direction: {}", record.direction());
    println!("  steps:     {}/{}", report.completed_steps, report.step_count);
    println!("  submitted: {}", report.submitted_at.to_rfc3339());
    if let Some(completed) = report.completed_at {
        println!("  completed: {}", completed.to_rfc3339());
    }
    print_failures(&record);
    println!();
    println!("{}", record.audit().summary());
    Ok(())
}

fn recover(config: &Config) -> Result<()> {
    let service = job_service(config, Arc::new(InMemoryCloud::default()))?;
    let recovered = service.recover()?;
    if recovered.is_empty() {
        println!("No unfinished flights.");
        return Ok(());
    }
    for id in &recovered {
        let result = service.await_result(id)?;
        println!("Recovered flight {id}: {}", result.status());
    }
    Ok(())
}

fn print_failures(record: &FlightRecord) {
    if let Some(failure) = record.failure() {
        println!("  failure:   {failure}: {}", failure.cause);
    }
    if let Some(compensation) = record.compensation_failure() {
        println!("  rollback:  {compensation}: {}", compensation.cause);
    }
}
