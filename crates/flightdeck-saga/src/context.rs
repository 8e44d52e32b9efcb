use crate::flight::{Direction, FlightId};
use crate::working_map::WorkingMap;

/// What a step sees while it runs.
///
/// The Working Map is the only channel between steps; input parameters are
/// fixed when the flight is submitted and are read-only.
pub struct FlightContext<'a> {
    flight_id: &'a FlightId,
    flight_type: &'a str,
    input: &'a WorkingMap,
    working_map: &'a mut WorkingMap,
    direction: Direction,
    step_index: usize,
    attempt: u32,
}

impl<'a> FlightContext<'a> {
    pub(crate) fn new(
        flight_id: &'a FlightId,
        flight_type: &'a str,
        input: &'a WorkingMap,
        working_map: &'a mut WorkingMap,
        direction: Direction,
        step_index: usize,
        attempt: u32,
    ) -> Self {
        Self {
            flight_id,
            flight_type,
            input,
            working_map,
            direction,
            step_index,
            attempt,
        }
    }

    #[must_use]
    pub fn flight_id(&self) -> &FlightId {
        self.flight_id
    }

    #[must_use]
    pub fn flight_type(&self) -> &str {
        self.flight_type
    }

    /// Input parameters of the flight.
    #[must_use]
    pub fn input(&self) -> &WorkingMap {
        self.input
    }

    #[must_use]
    pub fn working_map(&self) -> &WorkingMap {
        self.working_map
    }

    pub fn working_map_mut(&mut self) -> &mut WorkingMap {
        self.working_map
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Position of the running step in the flight.
    #[must_use]
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// One-based attempt number of the current direction of this step.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
