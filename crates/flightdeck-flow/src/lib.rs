//! Declarative construction of flights.
//!
//! Instead of hand-writing a [`flightdeck_saga::Step`] per action, an
//! operation is written as a sequence of calls on stateless
//! [`OperationSet`]s. Each call becomes one step; its output is represented
//! by a typed [`Future`] that later calls take as an argument and that is
//! resolved from the Working Map when the flight runs. How every operation is
//! compensated is declared once per operation set and checked while the flow
//! is built, never while it runs.

mod error;
mod flow;
mod future;
mod operation;
mod step;

pub use error::{Classifier, FlowError, OperationError, default_classifier};
pub use flow::{Flow, StepHandle};
pub use future::{Arg, ArgSource, Future, StepArgs, value};
pub use operation::{Compensation, Handler, OperationDecl, OperationRegistry, OperationSet};
