use std::collections::BTreeMap;
use std::sync::Arc;

use flightdeck_saga::{FlightDefinition, WorkingMap};

use crate::error::{BuildError, JobError, Result};

/// Builds the step list of one flight type from the flight's input.
///
/// A factory is called once when a job is submitted and again whenever the
/// flight is resumed from the store, so it must depend on nothing but the
/// input.
pub trait FlightFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the input is unusable or the flight cannot
    /// be assembled.
    fn build(&self, input: &WorkingMap) -> std::result::Result<FlightDefinition, BuildError>;
}

impl<F> FlightFactory for F
where
    F: Fn(&WorkingMap) -> std::result::Result<FlightDefinition, BuildError> + Send + Sync,
{
    fn build(&self, input: &WorkingMap) -> std::result::Result<FlightDefinition, BuildError> {
        self(input)
    }
}

/// Registered flight factories, keyed by flight type.
#[derive(Clone, Default)]
pub struct FlightFactories {
    factories: BTreeMap<String, Arc<dyn FlightFactory>>,
}

impl FlightFactories {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `flight_type`, replacing any earlier one.
    #[must_use]
    pub fn with(mut self, flight_type: impl Into<String>, factory: impl FlightFactory + 'static) -> Self {
        self.register(flight_type, factory);
        self
    }

    pub fn register(&mut self, flight_type: impl Into<String>, factory: impl FlightFactory + 'static) {
        self.factories.insert(flight_type.into(), Arc::new(factory));
    }

    pub fn flight_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, flight_type: &str) -> bool {
        self.factories.contains_key(flight_type)
    }

    /// Build a definition of `flight_type` for `input`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownFlightType`] if nothing is registered under
    /// `flight_type`, [`JobError::Build`] if the factory fails and
    /// [`JobError::FactoryMismatch`] if it builds a flight of another type.
    pub fn build(&self, flight_type: &str, input: &WorkingMap) -> Result<FlightDefinition> {
        let factory = self
            .factories
            .get(flight_type)
            .ok_or_else(|| JobError::UnknownFlightType(flight_type.to_string()))?;
        let definition = factory.build(input).map_err(|source| JobError::Build {
            flight_type: flight_type.to_string(),
            source,
        })?;
        if definition.flight_type() != flight_type {
            return Err(JobError::FactoryMismatch {
                registered: flight_type.to_string(),
                built: definition.flight_type().to_string(),
            });
        }
        Ok(definition)
    }
}
