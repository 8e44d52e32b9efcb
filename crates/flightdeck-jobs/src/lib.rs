//! Job surface on top of the saga executor.
//!
//! [`JobService`] is the boundary the rest of a control plane needs: submit a
//! flight by type and input, then await or inspect its outcome. Flights are
//! built by registered [`FlightFactory`]s, run on background threads and
//! recovered from the store after a restart.
//!
//! [`PeriodicJob`] runs maintenance work on a timer, guarded by a
//! [`ClaimStore`] so that at most one replica does the work per interval.

mod config;
mod cron;
mod error;
mod factory;
mod service;

pub use config::{CronConfig, JobsConfig};
pub use cron::{
    ClaimStore, CycleOutcome, FileClaimStore, InMemoryClaimStore, PeriodicHandle, PeriodicJob,
    TaskError,
};
pub use error::{BuildError, JobError, Result};
pub use factory::{FlightFactories, FlightFactory};
pub use service::{JobFilter, JobReport, JobResult, JobService};
