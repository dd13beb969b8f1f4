use async_trait::async_trait;
use fixcheck_core::db::SqlValue;
use fixcheck_core::doctor::find_on_path;
use fixcheck_core::model::{Dialect, TestCaseStatus};
use fixcheck_core::testcase::{HelperHost, ScriptRunner, TestCaseExecutor, TestCaseInput};
use serde_json::{json, Value};
use std::time::Duration;

/// Answers helper calls from canned values and remembers what was asked.
#[derive(Default)]
struct CannedHost {
    calls: Vec<(String, Value)>,
}

#[async_trait]
impl HelperHost for CannedHost {
    async fn call(&mut self, name: &str, args: &Value) -> anyhow::Result<Value> {
        self.calls.push((name.to_string(), args.clone()));
        match name {
            "perform_query" => Ok(json!([[1, "alice"], [2, "bob"]])),
            "ex_base" => Ok(json!(1)),
            "execute_queries" => Ok(json!({
                "result": [[42]],
                "execution_error": false,
                "timeout_error": false,
                "error_message": null,
            })),
            other => anyhow::bail!("no helper named {other}"),
        }
    }
}

fn runner() -> Option<ScriptRunner> {
    if find_on_path("python3").is_none() {
        eprintln!("python3 not found; skipping");
        return None;
    }
    Some(ScriptRunner::new("python3", Duration::from_secs(20)))
}

fn input(dialect: Dialect) -> TestCaseInput {
    TestCaseInput {
        dialect,
        db_name: "shop_process_1".into(),
        pred_sqls: vec!["SELECT id, name FROM users".into()],
        sol_sqls: vec!["SELECT id, name FROM users ORDER BY id".into()],
        result: Some(vec![vec![SqlValue::Int(7)]]),
    }
}

#[tokio::test]
async fn helper_calls_round_trip_through_the_host() {
    let Some(runner) = runner() else { return };
    let code = r#"
def test_case(pred_sqls, sol_sqls, db_name, conn):
    assert db_name == "shop_process_1"
    assert ex_base(pred_sqls, sol_sqls, db_name, conn) == 1
    cur = conn.cursor()
    cur.execute("SELECT id, name FROM users")
    assert cur.fetchall() == [(1, "alice"), (2, "bob")]
    assert pred_query_result == [(7,)]
    print("checked")
"#;
    let mut host = CannedHost::default();
    let report = runner
        .run_case(code, &input(Dialect::Postgresql), &mut host)
        .await;

    assert_eq!(report.status, TestCaseStatus::Passed, "{:?}", report.message);
    assert!(report.stdout.contains("checked"));
    let names: Vec<_> = host.calls.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["ex_base", "perform_query"]);
    assert_eq!(host.calls[0].1["pred_sqls"][0], "SELECT id, name FROM users");
}

#[tokio::test]
async fn execute_queries_shape_follows_the_dialect() {
    let Some(runner) = runner() else { return };
    let code = r#"
def test_case(pred_sqls, sol_sqls, db_name, conn):
    out = execute_queries(sol_sqls, db_name, conn)
    assert len(out) == 4
    assert out[0] == [(42,)]
"#;
    let mut host = CannedHost::default();
    let report = runner.run_case(code, &input(Dialect::Mysql), &mut host).await;
    assert_eq!(report.status, TestCaseStatus::Passed, "{:?}", report.message);

    let report = runner
        .run_case(code, &input(Dialect::Postgresql), &mut host)
        .await;
    assert_eq!(report.status, TestCaseStatus::Failed);
}

#[tokio::test]
async fn assertion_failures_and_helper_errors_fail_the_case() {
    let Some(runner) = runner() else { return };
    let mut host = CannedHost::default();

    let failing = "def test_case(pred_sqls, sol_sqls, db_name, conn):\n    assert 1 == 2, 'mismatch'\n";
    let report = runner
        .run_case(failing, &input(Dialect::Postgresql), &mut host)
        .await;
    assert_eq!(report.status, TestCaseStatus::Failed);
    assert!(report.message.unwrap_or_default().contains("mismatch"));

    let unknown = "def test_case(pred_sqls, sol_sqls, db_name, conn):\n    remove_distinct(pred_sqls)\n";
    let report = runner
        .run_case(unknown, &input(Dialect::Postgresql), &mut host)
        .await;
    assert_eq!(report.status, TestCaseStatus::Failed);
    assert!(report
        .message
        .unwrap_or_default()
        .contains("no helper named remove_distinct"));
}

#[tokio::test]
async fn slow_cases_time_out() {
    if find_on_path("python3").is_none() {
        return;
    }
    let runner = ScriptRunner::new("python3", Duration::from_millis(500));
    let code = "import time\ndef test_case(pred_sqls, sol_sqls, db_name, conn):\n    time.sleep(30)\n";
    let mut host = CannedHost::default();
    let report = runner
        .run_case(code, &input(Dialect::Postgresql), &mut host)
        .await;
    assert_eq!(report.status, TestCaseStatus::Timeout);
}

#[tokio::test]
async fn stderr_is_kept_on_the_report() {
    let Some(runner) = runner() else { return };
    let code = "import sys\ndef test_case(pred_sqls, sol_sqls, db_name, conn):\n    print('deprecated helper', file=sys.stderr)\n";
    let mut host = CannedHost::default();
    let report = runner
        .run_case(code, &input(Dialect::Postgresql), &mut host)
        .await;
    assert_eq!(report.status, TestCaseStatus::Passed, "{:?}", report.message);
    assert!(report.stderr.contains("deprecated helper"), "{:?}", report.stderr);
    assert!(report.stdout.is_empty());
}
