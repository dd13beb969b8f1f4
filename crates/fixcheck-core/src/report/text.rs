use super::{category, RunArtifacts};
use crate::model::InstanceOutcome;
use std::fmt::Write;
use std::path::Path;

const SEPARATOR_WIDTH: usize = 50;

pub fn question_line(o: &InstanceOutcome) -> String {
    let failed = if o.failed_test_cases.is_empty() {
        "None".to_string()
    } else {
        o.failed_test_cases.join(", ")
    };
    let mut line = format!(
        "Question_{}: ({}/{}) test cases passed, failed test cases: {}",
        o.instance_id, o.passed_test_cases, o.total_test_cases, failed
    );
    if o.unexpected_pass() {
        line.push_str(" | Error Phase: Unexpected Pass");
    }
    if o.execution_error {
        line.push_str(" | Sol Phase: Execution Error");
    }
    if o.timeout_error {
        line.push_str(" | Sol Phase: Timeout Error");
    }
    if o.assertion_error {
        line.push_str(" | Sol Phase: Assertion Error");
    }
    line
}

/// The plain-text run report. `timestamp` is passed in so output is
/// reproducible in tests.
pub fn render(run: &RunArtifacts, timestamp: &str) -> String {
    let r = &run.report;
    let mut out = String::new();
    let workers = if run.multi_worker { ", Multi-Worker" } else { "" };

    let _ = writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH));
    let _ = writeln!(
        out,
        "Fixcheck Result Statistics ({}{}):",
        run.dialect.label(),
        workers
    );
    let _ = writeln!(out, "Number of Instances: {}", r.total);
    let _ = writeln!(out, "Number of Execution Errors: {}", r.execution_errors);
    let _ = writeln!(out, "Number of Timeouts: {}", r.timeouts);
    let _ = writeln!(out, "Number of Assertion Errors: {}", r.assertion_errors);
    let _ = writeln!(out, "Number of Error SQL Errors: {}", r.error_sql_errors);
    let _ = writeln!(out, "Total Errors: {}", r.total_errors());
    let _ = writeln!(out, "Overall Accuracy: {:.2}%", r.accuracy());
    let _ = writeln!(out, "Timestamp: {timestamp}");
    out.push('\n');

    for o in &run.outcomes {
        let _ = writeln!(out, "{}", question_line(o));
    }
    out.push('\n');
    out.push_str(&category::render_table(&run.outcomes, "Test Case"));
    out
}

pub fn write_report(path: &Path, run: &RunArtifacts, timestamp: &str) -> std::io::Result<()> {
    std::fs::write(path, render(run, timestamp))
}
