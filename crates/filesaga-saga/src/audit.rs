use std::time::{Duration, Instant};

/// Status of a step in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuditStatus {
    /// Step applied successfully.
    Applied,
    /// Step failed during execution.
    Failed,
    /// Step was compensated successfully.
    Compensated,
    /// Step compensation failed.
    CompensationFailed,
}

/// Record of one step of a batch.
#[derive(Debug)]
pub struct AuditRecord {
    /// Index of the step in the batch.
    pub step: usize,
    /// The forward operation, as text.
    pub description: String,
    pub status: AuditStatus,
    pub started_at: Instant,
    /// When the step last changed (execution or compensation).
    pub completed_at: Option<Instant>,
    /// Description of the compensation, once one ran.
    pub compensation: Option<String>,
}

impl AuditRecord {
    /// Time from start to completion, once the step finished.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.completed_at.map(|at| at.duration_since(self.started_at))
    }
}

/// In-memory log of step executions and compensations for one batch.
#[derive(Debug, Default)]
pub struct BatchAuditLog {
    records: Vec<AuditRecord>,
}

impl BatchAuditLog {
    /// Create a new empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&mut self, step: usize, description: String) {
        self.records.push(AuditRecord {
            step,
            description,
            status: AuditStatus::Applied,
            started_at: Instant::now(),
            completed_at: None,
            compensation: None,
        });
    }

    /// Mark the last step as failed.
    pub(crate) fn record_failure(&mut self) {
        if let Some(record) = self.records.last_mut() {
            record.status = AuditStatus::Failed;
            record.completed_at = Some(Instant::now());
        }
    }

    /// Mark the last step as applied.
    pub(crate) fn record_success(&mut self) {
        if let Some(record) = self.records.last_mut() {
            record.status = AuditStatus::Applied;
            record.completed_at = Some(Instant::now());
        }
    }

    pub(crate) fn record_compensated(&mut self, step: usize, compensation: String) {
        self.finish_compensation(step, compensation, AuditStatus::Compensated);
    }

    pub(crate) fn record_compensation_failed(&mut self, step: usize, compensation: String) {
        self.finish_compensation(step, compensation, AuditStatus::CompensationFailed);
    }

    /// Steps applied before this process started (recovery) get a record
    /// of their own.
    fn finish_compensation(&mut self, step: usize, compensation: String, status: AuditStatus) {
        let now = Instant::now();
        if let Some(record) = self.records.iter_mut().find(|r| r.step == step) {
            record.status = status;
            record.completed_at = Some(now);
            record.compensation = Some(compensation);
            return;
        }
        self.records.push(AuditRecord {
            step,
            description: format!("step {step}"),
            status,
            started_at: now,
            completed_at: Some(now),
            compensation: Some(compensation),
        });
    }

    /// Records in the order they were written.
    #[must_use]
    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    /// One line per step, for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for record in &self.records {
            let status = match record.status {
                AuditStatus::Applied => "✓",
                AuditStatus::Failed => "✗",
                AuditStatus::Compensated => "↩",
                AuditStatus::CompensationFailed => "⚠",
            };
            match &record.compensation {
                Some(compensation) => {
                    lines.push(format!("{status} {} ({compensation})", record.description));
                }
                None => lines.push(format!("{status} {}", record.description)),
            }
        }
        lines.join("\n")
    }
}
