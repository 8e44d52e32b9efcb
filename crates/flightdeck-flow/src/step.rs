use std::sync::Arc;

use flightdeck_saga::{FlightContext, Step, StepFailure, StepOutcome, output_key};
use serde::Serialize;

use crate::error::{Classifier, OperationError};
use crate::future::StepArgs;
use crate::operation::OperationFn;

pub(crate) struct Undo<O, A> {
    pub(crate) name: String,
    pub(crate) function: OperationFn<O, A, ()>,
}

/// A single call on an operation set, captured as a flight step.
///
/// Arguments are resolved against the Working Map each time the step runs,
/// forward or backward; the forward result is stored under the step's own
/// output key.
pub(crate) struct OperationStep<O, A: StepArgs, R> {
    pub(crate) operation: String,
    pub(crate) target: Arc<O>,
    pub(crate) args: A,
    pub(crate) forward: OperationFn<O, A::Resolved, R>,
    pub(crate) undo: Option<Undo<O, A::Resolved>>,
    pub(crate) classifier: Classifier,
    pub(crate) stores_output: bool,
}

impl<O, A, R> OperationStep<O, A, R>
where
    A: StepArgs,
{
    fn failed(&self, error: &OperationError) -> StepOutcome {
        StepOutcome::failure((self.classifier)(error), StepFailure::from_error(error))
    }
}

impl<O, A, R> Step for OperationStep<O, A, R>
where
    O: Send + Sync + 'static,
    A: StepArgs,
    R: Serialize + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.operation
    }

    fn do_step(&self, ctx: &mut FlightContext<'_>) -> StepOutcome {
        let args = match self.args.resolve(ctx.working_map()) {
            Ok(args) => args,
            Err(err) => return StepOutcome::FatalFailure(StepFailure::from_error(&err)),
        };
        let output = match (self.forward)(&self.target, args) {
            Ok(output) => output,
            Err(err) => return self.failed(&err),
        };
        if self.stores_output {
            let key = output_key(ctx.step_index());
            if let Err(err) = ctx.working_map_mut().put(key, &output) {
                return StepOutcome::FatalFailure(StepFailure::from_error(&err));
            }
        }
        StepOutcome::Success
    }

    fn undo_step(&self, ctx: &mut FlightContext<'_>) -> StepOutcome {
        let Some(undo) = &self.undo else {
            return StepOutcome::Success;
        };
        let args = match self.args.resolve(ctx.working_map()) {
            Ok(args) => args,
            Err(err) => return StepOutcome::FatalFailure(StepFailure::from_error(&err)),
        };
        match (undo.function)(&self.target, args) {
            Ok(()) => StepOutcome::Success,
            Err(err) => self.failed(&err),
        }
    }

    fn has_compensation(&self) -> bool {
        self.undo.is_some()
    }

    fn compensation_description(&self) -> String {
        match &self.undo {
            Some(undo) => undo.name.clone(),
            None => "none".to_string(),
        }
    }
}
