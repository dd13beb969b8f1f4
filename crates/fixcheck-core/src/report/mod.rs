pub mod category;
pub mod console;
pub mod jsonl;
pub mod text;

use crate::model::{Dialect, InstanceOutcome, InstanceRecord};
use serde::Serialize;
use std::sync::Mutex;

/// Run-wide counters. Every instance counts toward `total`; the error
/// counters are independent and may overlap.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateReport {
    pub total: usize,
    pub passed: usize,
    pub execution_errors: usize,
    pub timeouts: usize,
    pub assertion_errors: usize,
    /// Instances whose benchmark data is unusable: missing fields or an
    /// error phase that passed its tests.
    pub error_sql_errors: usize,
    pub unexpected_passes: usize,
}

impl AggregateReport {
    pub fn record(&mut self, o: &InstanceOutcome) {
        self.total += 1;
        if !o.missing_fields.is_empty() {
            self.error_sql_errors += 1;
            return;
        }
        if o.unexpected_pass() {
            self.unexpected_passes += 1;
            self.error_sql_errors += 1;
        }
        if o.execution_error {
            self.execution_errors += 1;
        }
        if o.timeout_error {
            self.timeouts += 1;
        }
        if o.assertion_error {
            self.assertion_errors += 1;
        }
        if o.passed() {
            self.passed += 1;
        }
    }

    pub fn total_errors(&self) -> usize {
        self.execution_errors + self.timeouts + self.assertion_errors + self.error_sql_errors
    }

    /// Percentage of passed instances; 0 for an empty run.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64 * 100.0
        }
    }
}

/// Shared accumulator fed by concurrent workers.
#[derive(Debug, Default)]
pub struct ReportAccumulator(Mutex<AggregateReport>);

impl ReportAccumulator {
    pub fn record(&self, o: &InstanceOutcome) {
        if let Ok(mut r) = self.0.lock() {
            r.record(o);
        }
    }

    pub fn snapshot(&self) -> AggregateReport {
        self.0.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct RunArtifacts {
    pub dialect: Dialect,
    pub multi_worker: bool,
    pub records: Vec<InstanceRecord>,
    /// Sorted by dataset index, one per record.
    pub outcomes: Vec<InstanceOutcome>,
    pub report: AggregateReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ErrorPhaseOutcome;
    use serde_json::json;

    fn outcome(id: &str) -> InstanceOutcome {
        let r = InstanceRecord::from_value(0, json!({"instance_id": id})).unwrap();
        InstanceOutcome::new(&r)
    }

    #[test]
    fn counters_follow_outcome_flags() {
        let mut rep = AggregateReport::default();

        rep.record(&outcome("ok"));

        let mut t = outcome("slow");
        t.timeout_error = true;
        rep.record(&t);

        let mut u = outcome("bad-data");
        u.error_phase = ErrorPhaseOutcome::UnexpectedPass;
        rep.record(&u);

        let mut m = outcome("missing");
        m.missing_fields = vec!["sol_sql".into()];
        m.execution_error = true;
        rep.record(&m);

        assert_eq!(rep.total, 4);
        assert_eq!(rep.passed, 1);
        assert_eq!(rep.timeouts, 1);
        assert_eq!(rep.execution_errors, 0);
        assert_eq!(rep.unexpected_passes, 1);
        assert_eq!(rep.error_sql_errors, 2);
        assert_eq!(rep.total_errors(), 3);
        assert!((rep.accuracy() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn empty_run_has_zero_accuracy() {
        assert_eq!(AggregateReport::default().accuracy(), 0.0);
    }
}
