use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flightdeck_saga::{FlightBuilder, FlightDefinition, output_key};
use serde::Serialize;
use tracing::debug;

use crate::error::FlowError;
use crate::future::{FlowId, Future, StepArgs, TokenRef};
use crate::operation::{Compensation, OperationFn, OperationRegistry, OperationSet};
use crate::step::{OperationStep, Undo};

static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

/// A flight written as a sequence of calls on operation sets.
///
/// Each call registers one step at the next position and returns a
/// [`Future`] for its output, which later calls take as an argument:
///
/// ```
/// use std::sync::Arc;
///
/// use flightdeck_flow::{Flow, OperationError, OperationRegistry, OperationSet, value};
///
/// struct Math;
///
/// impl Math {
///     fn double(&self, x: i64) -> Result<i64, OperationError> {
///         Ok(x * 2)
///     }
/// }
///
/// impl OperationSet for Math {
///     fn register(registry: &mut OperationRegistry<Self>) {
///         registry.operation("double", Self::double).no_undo();
///     }
/// }
///
/// # fn main() -> Result<(), flightdeck_flow::FlowError> {
/// let math = Arc::new(Math);
/// let mut flow = Flow::new("quadruple");
/// let twice = flow.step(&math).call::<_, i64>("double", value(3_i64))?;
/// let four_times = flow.step(&math).call::<_, i64>("double", twice)?;
/// flow.set_result(&four_times)?;
/// let definition = flow.build()?;
/// assert_eq!(definition.step_names(), ["double", "double"]);
/// # Ok(())
/// # }
/// ```
///
/// Every mistake in wiring the flow is reported by the call that makes it,
/// and again by [`Flow::build`], before any step runs.
pub struct Flow {
    id: FlowId,
    builder: FlightBuilder,
    registries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    error: Option<FlowError>,
}

impl Flow {
    #[must_use]
    pub fn new(flight_type: impl Into<String>) -> Self {
        Self {
            id: FlowId(NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed)),
            builder: FlightBuilder::new(flight_type),
            registries: HashMap::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn flight_type(&self) -> &str {
        self.builder.flight_type()
    }

    /// Number of steps registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.builder.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// A handle for registering exactly one call on `target`.
    pub fn step<O: OperationSet>(&mut self, target: &Arc<O>) -> StepHandle<'_, O> {
        let registry = self.registry::<O>();
        StepHandle {
            flow: self,
            target: Arc::clone(target),
            registry,
            used: None,
        }
    }

    /// Designate the step whose output becomes the flight's result.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::ForeignToken`] or [`FlowError::UnknownToken`] if
    /// `token` was not handed out by this flow.
    pub fn set_result<T>(&mut self, token: &Future<T>) -> Result<(), FlowError> {
        let checked = self.check_token(token.token_ref());
        let result = checked.map(|()| self.builder.set_result_key(output_key(token.index())));
        self.remember(result)
    }

    /// Finish the flow.
    ///
    /// # Errors
    ///
    /// Returns the first construction error made while registering steps, or
    /// [`FlowError::Empty`] if no step was registered.
    pub fn build(self) -> Result<FlightDefinition, FlowError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let flow = self.builder.flight_type().to_string();
        self.builder.build().map_err(|_| FlowError::Empty { flow })
    }

    fn registry<O: OperationSet>(&mut self) -> Arc<OperationRegistry<O>> {
        let cached = self
            .registries
            .entry(TypeId::of::<O>())
            .or_insert_with(|| Box::new(Arc::new(OperationRegistry::<O>::collect())));
        match cached.downcast_ref::<Arc<OperationRegistry<O>>>() {
            Some(registry) => Arc::clone(registry),
            None => Arc::new(OperationRegistry::collect()),
        }
    }

    fn check_token(&self, token: TokenRef) -> Result<(), FlowError> {
        if token.flow != self.id {
            return Err(FlowError::ForeignToken { index: token.index });
        }
        if token.index >= self.builder.len() {
            return Err(FlowError::UnknownToken {
                flow: self.flight_type().to_string(),
                index: token.index,
            });
        }
        Ok(())
    }

    fn remember<T>(&mut self, result: Result<T, FlowError>) -> Result<T, FlowError> {
        if let (Err(err), None) = (&result, &self.error) {
            self.error = Some(err.clone());
        }
        result
    }
}

/// Registers one call on an operation set; see [`Flow::step`].
pub struct StepHandle<'f, O> {
    flow: &'f mut Flow,
    target: Arc<O>,
    registry: Arc<OperationRegistry<O>>,
    used: Option<String>,
}

impl<O: OperationSet> StepHandle<'_, O> {
    /// Register a call of a value-returning operation.
    ///
    /// # Errors
    ///
    /// Returns a [`FlowError`] if the handle was already used, the operation
    /// or its undo cannot be resolved, the argument and output types differ
    /// from the registered ones, or an argument refers to a foreign output.
    pub fn call<A, R>(&mut self, operation: &str, args: A) -> Result<Future<R>, FlowError>
    where
        A: StepArgs,
        R: Serialize + Send + Sync + 'static,
    {
        let result = self.register::<A, R>(operation, args, false);
        self.flow.remember(result)
    }

    /// Register a call of an operation that returns nothing.
    ///
    /// # Errors
    ///
    /// Same as [`StepHandle::call`].
    pub fn call_unit<A>(&mut self, operation: &str, args: A) -> Result<(), FlowError>
    where
        A: StepArgs,
    {
        let result = self.register::<A, ()>(operation, args, true).map(|_| ());
        self.flow.remember(result)
    }

    fn register<A, R>(
        &mut self,
        operation: &str,
        args: A,
        unit: bool,
    ) -> Result<Future<R>, FlowError>
    where
        A: StepArgs,
        R: Serialize + Send + Sync + 'static,
    {
        if let Some(first) = &self.used {
            return Err(FlowError::HandleReused {
                first: first.clone(),
                second: operation.to_string(),
            });
        }
        self.used = Some(operation.to_string());

        if let Some(error) = self.registry.first_error() {
            return Err(error.clone());
        }
        let entry = self
            .registry
            .operation_entry(operation)
            .ok_or_else(|| FlowError::OperationNotFound {
                operation_set: O::set_name(),
                operation: operation.to_string(),
            })?;

        match (entry.returns_unit, unit) {
            (true, false) => {
                return Err(FlowError::UnitOperation {
                    operation: operation.to_string(),
                });
            }
            (false, true) => {
                return Err(FlowError::ValueOperation {
                    operation: operation.to_string(),
                });
            }
            _ => {}
        }

        let forward = entry
            .function
            .downcast_ref::<OperationFn<O, A::Resolved, R>>()
            .cloned()
            .ok_or_else(|| FlowError::SignatureMismatch {
                operation: operation.to_string(),
                registered_args: entry.args,
                registered_output: entry.output,
                called_args: type_name::<A::Resolved>(),
                called_output: type_name::<R>(),
            })?;

        if entry.declared_twice {
            return Err(FlowError::ConflictingCompensation {
                operation: operation.to_string(),
            });
        }
        let undo = match &entry.compensation {
            Compensation::Undeclared => {
                return Err(FlowError::CompensationUndeclared {
                    operation: operation.to_string(),
                });
            }
            Compensation::None => None,
            Compensation::With(name) => {
                let undo_entry =
                    self.registry
                        .undo_entry(name)
                        .ok_or_else(|| FlowError::UndoNotFound {
                            operation: operation.to_string(),
                            undo: name.clone(),
                        })?;
                let function = undo_entry
                    .function
                    .downcast_ref::<OperationFn<O, A::Resolved, ()>>()
                    .cloned()
                    .ok_or_else(|| FlowError::UndoSignatureMismatch {
                        operation: operation.to_string(),
                        undo: name.clone(),
                        registered: undo_entry.args,
                        called: type_name::<A::Resolved>(),
                    })?;
                Some(Undo {
                    name: name.clone(),
                    function,
                })
            }
        };

        for token in args.tokens() {
            self.flow.check_token(token)?;
        }

        let retry = entry.retry.clone();
        let step = OperationStep {
            operation: operation.to_string(),
            target: Arc::clone(&self.target),
            args,
            forward,
            undo,
            classifier: entry.classifier,
            stores_output: !unit,
        };
        let index = self.flow.builder.push(Box::new(step), retry);
        debug!(
            flow = self.flow.flight_type(),
            index,
            operation,
            "registered flow step"
        );
        Ok(Future::new(self.flow.id, index))
    }
}
