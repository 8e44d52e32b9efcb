//! Durable saga executor.
//!
//! A flight is an ordered list of steps, each with a forward action, a
//! compensating action and a retry policy. The executor runs the steps in
//! order and, when one fails fatally, undoes the completed ones in reverse
//! order. Steps exchange data only through the flight's [`WorkingMap`], and
//! the whole execution state is saved to a [`FlightStore`] after every
//! transition so that a flight can be resumed after a restart.

mod audit;
mod builder;
mod context;
mod debug;
mod error;
mod executor;
mod flight;
mod hook;
mod retry;
mod step;
mod store;
mod working_map;

pub use audit::{FlightAuditLog, StepRecord, StepStatus};
pub use builder::FlightBuilder;
pub use context::FlightContext;
pub use debug::FlightDebugInfo;
pub use error::{
    CompensationError, FlightError, FlightFailure, SagaError, StepFailure, StoreError,
    WorkingMapError,
};
pub use executor::{FlightExecutor, RunExit};
pub use flight::{
    Direction, FlightDefinition, FlightId, FlightRecord, FlightStatus, ParseStatusError,
};
pub use hook::{FlightHook, StepInfo, TracingHook};
pub use retry::RetryPolicy;
pub use step::{FailureKind, Step, StepOutcome};
pub use store::{FileFlightStore, FlightStore, InMemoryFlightStore};
pub use working_map::{WorkingMap, output_key};
