use std::io::Write;

use tracing::{debug, info, warn};

use crate::models::report::{OperationOutcome, RunReport};

pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &RunReport) -> Result<(), String>;
}

pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn publish(&self, report: &RunReport) -> Result<(), String> {
        info!(run_id = %report.run_id, dry_run = report.dry_run, "{}", report.summary_line());
        for entry in &report.entries {
            match entry.outcome {
                OperationOutcome::FailedRetryable | OperationOutcome::FailedFatal => warn!(
                    run_id = %report.run_id,
                    op = %entry.operation,
                    outcome = ?entry.outcome,
                    attempts = entry.attempts,
                    reason = %entry.reason,
                    "operation failed"
                ),
                _ => debug!(op = %entry.operation, outcome = ?entry.outcome, reason = %entry.reason),
            }
        }
        Ok(())
    }
}

/// Writes the report as pretty JSON to stdout.
pub struct JsonStdoutSink;

impl ReportSink for JsonStdoutSink {
    fn publish(&self, report: &RunReport) -> Result<(), String> {
        let json = serde_json::to_string_pretty(report).map_err(|e| e.to_string())?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{json}").map_err(|e| e.to_string())
    }
}

pub fn publish_all(sinks: &[&dyn ReportSink], report: &RunReport) {
    for sink in sinks {
        if let Err(e) = sink.publish(report) {
            warn!(run_id = %report.run_id, "failed to publish run report: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Collecting {
        seen: Mutex<Vec<String>>,
    }

    impl ReportSink for Collecting {
        fn publish(&self, report: &RunReport) -> Result<(), String> {
            self.seen.lock().unwrap().push(report.run_id.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl ReportSink for Broken {
        fn publish(&self, _report: &RunReport) -> Result<(), String> {
            Err("disk full".to_string())
        }
    }

    #[test]
    fn failing_sink_does_not_stop_the_others() {
        let report = RunReport::new(Utc::now(), false);
        let collecting = Collecting {
            seen: Mutex::new(Vec::new()),
        };
        let sinks: [&dyn ReportSink; 3] = [&Broken, &collecting, &TracingReportSink];
        publish_all(&sinks, &report);
        assert_eq!(collecting.seen.lock().unwrap().as_slice(), &[report.run_id.to_string()]);
    }
}
