use super::RunArtifacts;
use crate::model::ErrorPhaseOutcome;

pub fn print_summary(run: &RunArtifacts, verbose: bool) {
    eprintln!("\nEvaluated {} instances...", run.outcomes.len());

    for o in &run.outcomes {
        let counts = format!("({}/{})", o.passed_test_cases, o.total_test_cases);
        if o.passed() {
            eprintln!("✅ {:<24} {}", o.instance_id, counts);
            if verbose {
                if let ErrorPhaseOutcome::Reproduced { message } = &o.error_phase {
                    eprintln!("    error phase: {}", first_line(message));
                }
            }
            continue;
        }
        let message = o.error_message().unwrap_or_default();
        if o.infra_error.is_some() || !o.missing_fields.is_empty() {
            eprintln!("💥 {:<24} ERROR: {}", o.instance_id, first_line(&message));
        } else if o.unexpected_pass() {
            eprintln!("⚠️  {:<24} UNEXPECTED PASS {}", o.instance_id, counts);
        } else {
            eprintln!("❌ {:<24} {}  {}", o.instance_id, first_line(&message), counts);
        }
        if o.truncated {
            eprintln!("    (result truncated to the row cap)");
        }
    }

    let r = &run.report;
    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!(
        "Summary: {} passed, {} execution errors, {} timeouts, {} assertion errors, {} error-sql errors ({:.2}%)",
        r.passed,
        r.execution_errors,
        r.timeouts,
        r.assertion_errors,
        r.error_sql_errors,
        r.accuracy()
    );
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
