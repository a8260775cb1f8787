use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::plan::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Applied,
    Skipped,
    Planned,
    FailedRetryable,
    FailedFatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub operation: Operation,
    pub outcome: OperationOutcome,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            dry_run,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    pub fn count(&self, outcome: OperationOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.outcome,
                OperationOutcome::FailedRetryable | OperationOutcome::FailedFatal
            )
        })
    }

    pub fn summary_line(&self) -> String {
        format!(
            "run {}: {} applied, {} skipped, {} planned, {} failed-retryable, {} failed-fatal",
            self.run_id,
            self.count(OperationOutcome::Applied),
            self.count(OperationOutcome::Skipped),
            self.count(OperationOutcome::Planned),
            self.count(OperationOutcome::FailedRetryable),
            self.count(OperationOutcome::FailedFatal),
        )
    }
}
