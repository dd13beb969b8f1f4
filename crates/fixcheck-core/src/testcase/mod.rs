pub mod script;

use crate::db::value::{rows_to_wire, Rows};
use crate::model::{test_case_id, Dialect, TestCaseStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub use script::ScriptRunner;

/// Everything a test case sees besides its own code.
#[derive(Debug, Clone)]
pub struct TestCaseInput {
    pub dialect: Dialect,
    pub db_name: String,
    pub pred_sqls: Vec<String>,
    pub sol_sqls: Vec<String>,
    pub result: Option<Rows>,
}

impl TestCaseInput {
    pub fn init_message(&self, code: &str) -> Value {
        json!({
            "code": code,
            "dialect": self.dialect.to_string(),
            "db_name": self.db_name,
            "pred_sqls": self.pred_sqls,
            "sol_sqls": self.sol_sqls,
            "pred_query_result": self.result.as_ref().map(rows_to_wire),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseReport {
    pub status: TestCaseStatus,
    pub message: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl TestCaseReport {
    pub fn failed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: TestCaseStatus::Failed,
            message: Some(message.into()),
            stdout: String::new(),
            stderr: String::new(),
            duration,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestCaseSummary {
    pub passed: usize,
    /// `test_<n>` ids of failed and timed-out cases, in order.
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
    pub messages: Vec<String>,
}

impl TestCaseSummary {
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Answers helper calls made by a running test case, against the phase's
/// live connection.
#[async_trait]
pub trait HelperHost: Send {
    async fn call(&mut self, name: &str, args: &Value) -> anyhow::Result<Value>;

    /// The phase connection was abandoned mid-statement (a case timed out
    /// inside a helper call) and cannot serve further cases.
    fn connection_lost(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait TestCaseExecutor: Send + Sync {
    async fn run_case(
        &self,
        code: &str,
        input: &TestCaseInput,
        host: &mut dyn HelperHost,
    ) -> TestCaseReport;
}

/// Runs the cases of one phase sequentially; each gets its own time budget.
/// Once the host loses its connection the remaining cases fail unrun.
pub async fn run_all(
    executor: &dyn TestCaseExecutor,
    cases: &[String],
    input: &TestCaseInput,
    host: &mut dyn HelperHost,
) -> TestCaseSummary {
    let mut summary = TestCaseSummary::default();
    for (i, code) in cases.iter().enumerate() {
        let id = test_case_id(i);
        let report = executor.run_case(code, input, host).await;

        if !report.stdout.trim().is_empty() {
            tracing::debug!(event = "test_case_stdout", test = %id, stdout = %report.stdout);
        }
        if !report.stderr.trim().is_empty() {
            tracing::debug!(event = "test_case_stderr", test = %id, stderr = %report.stderr);
        }
        match report.status {
            TestCaseStatus::Passed => {
                summary.passed += 1;
                tracing::debug!(event = "test_case_passed", test = %id, ms = report.duration.as_millis() as u64);
            }
            TestCaseStatus::Failed => {
                tracing::info!(event = "test_case_failed", test = %id, message = report.message.as_deref().unwrap_or(""));
                summary.failed.push(id.clone());
            }
            TestCaseStatus::Timeout => {
                tracing::warn!(event = "test_case_timeout", test = %id);
                summary.timed_out.push(id.clone());
                summary.failed.push(id.clone());
            }
        }
        if let Some(m) = report.message {
            summary.messages.push(format!("{id}: {m}"));
        }

        if host.connection_lost() && i + 1 < cases.len() {
            tracing::warn!(event = "test_phase_connection_lost", after = %id);
            for j in i + 1..cases.len() {
                let skipped = test_case_id(j);
                summary
                    .messages
                    .push(format!("{skipped}: not run, connection lost after {id}"));
                summary.failed.push(skipped);
            }
            break;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<TestCaseStatus>>);

    #[async_trait]
    impl TestCaseExecutor for Scripted {
        async fn run_case(
            &self,
            _code: &str,
            _input: &TestCaseInput,
            _host: &mut dyn HelperHost,
        ) -> TestCaseReport {
            let status = self.0.lock().unwrap().remove(0);
            TestCaseReport {
                status,
                message: (status != TestCaseStatus::Passed).then(|| "nope".to_string()),
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            }
        }
    }

    struct NoHost;

    #[async_trait]
    impl HelperHost for NoHost {
        async fn call(&mut self, name: &str, _args: &Value) -> anyhow::Result<Value> {
            anyhow::bail!("unexpected helper call {name}")
        }
    }

    /// Loses its connection during the first helper call.
    struct LosingHost {
        calls: usize,
    }

    #[async_trait]
    impl HelperHost for LosingHost {
        async fn call(&mut self, _name: &str, _args: &Value) -> anyhow::Result<Value> {
            self.calls += 1;
            Ok(Value::Null)
        }

        fn connection_lost(&self) -> bool {
            self.calls > 0
        }
    }

    struct TimingOutExecutor;

    #[async_trait]
    impl TestCaseExecutor for TimingOutExecutor {
        async fn run_case(
            &self,
            _code: &str,
            _input: &TestCaseInput,
            host: &mut dyn HelperHost,
        ) -> TestCaseReport {
            let _ = host.call("perform_query", &Value::Null).await;
            TestCaseReport {
                status: TestCaseStatus::Timeout,
                message: Some("test case exceeded 1s".into()),
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            }
        }
    }

    fn input() -> TestCaseInput {
        TestCaseInput {
            dialect: Dialect::Postgresql,
            db_name: "shop_process_1".into(),
            pred_sqls: vec!["SELECT 1".into()],
            sol_sqls: vec!["SELECT 1".into()],
            result: Some(vec![]),
        }
    }

    #[tokio::test]
    async fn timeouts_count_as_failures_with_ids() {
        let exec = Scripted(Mutex::new(vec![
            TestCaseStatus::Passed,
            TestCaseStatus::Timeout,
            TestCaseStatus::Failed,
        ]));
        let cases = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let s = run_all(&exec, &cases, &input(), &mut NoHost).await;
        assert_eq!(s.passed, 1);
        assert_eq!(s.failed, vec!["test_2", "test_3"]);
        assert_eq!(s.timed_out, vec!["test_2"]);
        assert!(!s.all_passed());
    }

    #[tokio::test]
    async fn lost_connection_fails_the_rest_of_the_phase() {
        let cases = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut host = LosingHost { calls: 0 };
        let s = run_all(&TimingOutExecutor, &cases, &input(), &mut host).await;

        assert_eq!(host.calls, 1);
        assert_eq!(s.passed, 0);
        assert_eq!(s.failed, vec!["test_1", "test_2", "test_3"]);
        assert_eq!(s.timed_out, vec!["test_1"]);
        assert!(s.messages[1].contains("connection lost after test_1"));
    }

    #[test]
    fn init_message_marks_missing_result_as_null() {
        let mut i = input();
        i.result = None;
        let m = i.init_message("def test_case(*a): pass");
        assert!(m["pred_query_result"].is_null());
        assert_eq!(m["dialect"], "postgresql");
    }
}
