use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a step in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StepStatus {
    /// Forward action started but has not finished.
    Running,
    /// Step executed successfully.
    Executed,
    /// Step failed during execution.
    Failed,
    /// Step was compensated successfully.
    Compensated,
    /// Step compensation failed.
    CompensationFailed,
    /// Step declares no compensation and was passed over during rollback.
    Skipped,
}

/// Record of a step's execution in the flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Name of the step.
    pub name: String,
    /// Position of the step in the flight.
    pub index: usize,
    /// Current status.
    pub status: StepStatus,
    /// Number of forward attempts made.
    pub attempts: u32,
    /// When the step first started executing.
    pub started_at: DateTime<Utc>,
    /// When the step completed (execution or compensation).
    pub completed_at: Option<DateTime<Utc>>,
    /// Description of compensation (if applicable).
    pub compensation_description: Option<String>,
}

/// Audit log tracking all step executions in a flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightAuditLog {
    records: Vec<StepRecord>,
}

impl FlightAuditLog {
    /// Create a new empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find_mut(&mut self, index: usize) -> Option<&mut StepRecord> {
        self.records.iter_mut().rev().find(|r| r.index == index)
    }

    /// Record a forward attempt of the step at `index`.
    ///
    /// Retries and attempts repeated after a restart update the existing record.
    pub(crate) fn record_attempt(&mut self, index: usize, name: &str) {
        if let Some(record) = self.find_mut(index) {
            record.status = StepStatus::Running;
            record.attempts += 1;
            return;
        }
        self.records.push(StepRecord {
            name: name.to_string(),
            index,
            status: StepStatus::Running,
            attempts: 1,
            started_at: Utc::now(),
            completed_at: None,
            compensation_description: None,
        });
    }

    /// Mark the step at `index` as failed.
    pub(crate) fn record_failure(&mut self, index: usize) {
        if let Some(record) = self.find_mut(index) {
            record.status = StepStatus::Failed;
            record.completed_at = Some(Utc::now());
        }
    }

    /// Mark the step at `index` as completed successfully.
    pub(crate) fn record_success(&mut self, index: usize, compensation_description: String) {
        if let Some(record) = self.find_mut(index) {
            record.status = StepStatus::Executed;
            record.completed_at = Some(Utc::now());
            record.compensation_description = Some(compensation_description);
        }
    }

    /// Record that the step at `index` was compensated.
    pub(crate) fn record_compensated(&mut self, index: usize) {
        self.set_terminal(index, StepStatus::Compensated);
    }

    /// Record that the compensation of the step at `index` failed.
    pub(crate) fn record_compensation_failed(&mut self, index: usize) {
        self.set_terminal(index, StepStatus::CompensationFailed);
    }

    /// Record that the step at `index` had nothing to compensate.
    pub(crate) fn record_skipped(&mut self, index: usize) {
        self.set_terminal(index, StepStatus::Skipped);
    }

    fn set_terminal(&mut self, index: usize, status: StepStatus) {
        if let Some(record) = self.find_mut(index) {
            record.status = status;
            record.completed_at = Some(Utc::now());
        }
    }

    /// Get all records in the audit log.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Get the record of the step at `index`.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<&StepRecord> {
        self.records.iter().rev().find(|r| r.index == index)
    }

    /// Get a summary of the flight execution for display.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for record in &self.records {
            let status = match record.status {
                StepStatus::Running => "…",
                StepStatus::Executed => "✓",
                StepStatus::Failed => "✗",
                StepStatus::Compensated => "↩",
                StepStatus::CompensationFailed => "⚠",
                StepStatus::Skipped => "-",
            };
            if record.attempts > 1 {
                lines.push(format!(
                    "{status} {} ({} attempts)",
                    record.name, record.attempts
                ));
            } else {
                lines.push(format!("{status} {}", record.name));
            }
        }
        lines.join("\n")
    }
}
