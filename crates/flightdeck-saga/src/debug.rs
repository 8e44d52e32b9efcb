use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::step::FailureKind;

/// Fault injection for exercising recovery paths.
///
/// Each injected failure fires once: it is consumed from the flight record
/// when it triggers, so a retry or a resumed flight runs the real action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightDebugInfo {
    /// Replace the forward action of the step at the given index with a failure.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub do_step_failures: BTreeMap<usize, FailureKind>,
    /// Replace the undo action of the step at the given index with a failure.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub undo_step_failures: BTreeMap<usize, FailureKind>,
    /// Fail the flight after its last step succeeded, so every step is undone.
    #[serde(default)]
    pub last_step_failure: bool,
    /// Hand control back to the caller after each step transition.
    #[serde(default)]
    pub restart_each_step: bool,
}

impl FlightDebugInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fail_do(mut self, index: usize, kind: FailureKind) -> Self {
        self.do_step_failures.insert(index, kind);
        self
    }

    #[must_use]
    pub fn fail_undo(mut self, index: usize, kind: FailureKind) -> Self {
        self.undo_step_failures.insert(index, kind);
        self
    }

    #[must_use]
    pub fn fail_after_last_step(mut self) -> Self {
        self.last_step_failure = true;
        self
    }

    #[must_use]
    pub fn restart_each_step(mut self) -> Self {
        self.restart_each_step = true;
        self
    }

    /// Whether any failure is still waiting to be injected.
    #[must_use]
    pub fn has_pending_failures(&self) -> bool {
        !self.do_step_failures.is_empty()
            || !self.undo_step_failures.is_empty()
            || self.last_step_failure
    }
}
