use crate::error::FlightError;
use crate::flight::{FlightDefinition, FlightStep};
use crate::retry::RetryPolicy;
use crate::step::Step;

/// Builder for a [`FlightDefinition`] from hand-written [`Step`] implementations.
///
/// Steps run in the order they are added. Each step gets exactly one
/// [`RetryPolicy`]; [`FlightBuilder::then`] attaches [`RetryPolicy::None`].
///
/// ```
/// use flightdeck_saga::{FlightBuilder, FlightContext, RetryPolicy, Step, StepOutcome};
///
/// struct Reserve;
///
/// impl Step for Reserve {
///     fn name(&self) -> &str { "reserve" }
///     fn do_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome { StepOutcome::Success }
///     fn undo_step(&self, _ctx: &mut FlightContext<'_>) -> StepOutcome { StepOutcome::Success }
/// }
///
/// let definition = FlightBuilder::new("reserve_twice")
///     .then(Reserve)
///     .then_with_retry(Reserve, RetryPolicy::fixed_interval(std::time::Duration::from_secs(1), 3))
///     .build()
///     .expect("two steps");
/// assert_eq!(definition.len(), 2);
/// ```
///
/// An empty flight cannot be built:
///
/// ```
/// use flightdeck_saga::{FlightBuilder, FlightError};
///
/// let err = FlightBuilder::new("nothing").build().expect_err("no steps");
/// assert!(matches!(err, FlightError::EmptyFlight { .. }));
/// ```
pub struct FlightBuilder {
    flight_type: String,
    steps: Vec<FlightStep>,
    result_key: Option<String>,
}

impl FlightBuilder {
    #[must_use]
    pub fn new(flight_type: impl Into<String>) -> Self {
        Self {
            flight_type: flight_type.into(),
            steps: Vec::new(),
            result_key: None,
        }
    }

    /// Add a step without retries.
    #[must_use]
    pub fn then<S: Step + 'static>(self, step: S) -> Self {
        self.then_with_retry(step, RetryPolicy::None)
    }

    /// Add a step with its retry policy.
    #[must_use]
    pub fn then_with_retry<S: Step + 'static>(mut self, step: S, retry: RetryPolicy) -> Self {
        self.push(Box::new(step), retry);
        self
    }

    /// Append a boxed step and return its position in the flight.
    pub fn push(&mut self, step: Box<dyn Step>, retry: RetryPolicy) -> usize {
        self.steps.push(FlightStep { step, retry });
        self.steps.len() - 1
    }

    /// Designate the Working Map key whose value becomes the flight's result.
    #[must_use]
    pub fn result_key(mut self, key: impl Into<String>) -> Self {
        self.set_result_key(key);
        self
    }

    pub fn set_result_key(&mut self, key: impl Into<String>) {
        self.result_key = Some(key.into());
    }

    #[must_use]
    pub fn flight_type(&self) -> &str {
        &self.flight_type
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Build the definition from the accumulated steps.
    ///
    /// # Errors
    ///
    /// Returns [`FlightError::EmptyFlight`] if no step was added.
    pub fn build(self) -> Result<FlightDefinition, FlightError> {
        if self.steps.is_empty() {
            return Err(FlightError::EmptyFlight {
                flight_type: self.flight_type,
            });
        }
        Ok(FlightDefinition::new(
            self.flight_type,
            self.steps,
            self.result_key,
        ))
    }
}
