use async_trait::async_trait;
use fixcheck_core::coordinator::EphemeralCoordinator;
use fixcheck_core::engine::{RunPolicy, Runner, ScenarioBackend};
use fixcheck_core::errors::{ExecError, HarnessError};
use fixcheck_core::executor::{BatchKind, BatchOutcome, StatementFailure};
use fixcheck_core::model::InstanceRecord;
use fixcheck_core::testcase::{TestCaseInput, TestCaseSummary};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted server: statements named `bad` fail, test cases pass when the
/// candidate contains `good`, and resets of `broken` fail. Batches on
/// `stuck` never finish.
#[derive(Default)]
struct ScriptedServer {
    busy: Mutex<HashSet<String>>,
    overlaps: Mutex<Vec<String>>,
    resets: Mutex<Vec<String>>,
    abandoned: AtomicUsize,
}

struct CountOnDrop<'a>(&'a AtomicUsize);

impl Drop for CountOnDrop<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScenarioBackend for ScriptedServer {
    type Session = String;

    async fn reset(&self, db: &str) -> Result<(), HarnessError> {
        self.resets.lock().unwrap().push(db.to_string());
        if db == "broken" {
            return Err(HarnessError::Reset {
                db: db.into(),
                source: Box::new(HarnessError::AdminCommand {
                    command: "createdb".into(),
                    code: Some(1),
                    stderr: "template missing".into(),
                }),
            });
        }
        Ok(())
    }

    async fn open_session(&self, db: &str) -> Result<String, HarnessError> {
        Ok(db.to_string())
    }

    async fn execute(
        &self,
        session: &mut String,
        _db: &str,
        statements: &[String],
        kind: BatchKind,
    ) -> BatchOutcome {
        if session.as_str() == "stuck" {
            let _dropped = CountOnDrop(&self.abandoned);
            std::future::pending::<()>().await;
        }
        if !self.busy.lock().unwrap().insert(session.clone()) {
            self.overlaps.lock().unwrap().push(session.clone());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.busy.lock().unwrap().remove(session.as_str());

        let mut out = BatchOutcome::default();
        for (index, sql) in statements.iter().enumerate() {
            if sql == "bad" && kind == BatchKind::Critical {
                out.execution_error = true;
                out.failure = Some(StatementFailure {
                    index,
                    error: ExecError::Database("syntax error at or near \"bad\"".into()),
                });
                break;
            }
        }
        out
    }

    async fn run_test_cases(
        &self,
        _session: &mut String,
        cases: &[String],
        input: &TestCaseInput,
    ) -> TestCaseSummary {
        if input.pred_sqls.iter().any(|s| s == "good") {
            TestCaseSummary {
                passed: cases.len(),
                ..Default::default()
            }
        } else {
            TestCaseSummary {
                failed: vec!["test_1".into()],
                messages: vec!["rows differ".into()],
                ..Default::default()
            }
        }
    }
}

fn record(index: usize, db: &str, pred: &str) -> InstanceRecord {
    InstanceRecord::from_value(
        index,
        json!({
            "instance_id": format!("q{index}"),
            "selected_database": db,
            "preprocess_sql": [],
            "error_sql": ["bad"],
            "sol_sql": ["SELECT 1"],
            "pred_sqls": [pred],
            "test_cases": ["def test_case(pred_sqls, sol_sqls, db_name, conn): pass"],
        }),
    )
    .unwrap()
}

fn policy(workers: usize) -> RunPolicy {
    RunPolicy {
        workers,
        borrow_timeout: Duration::from_secs(5),
        ..RunPolicy::default()
    }
}

fn clones(base: &str, n: usize) -> Arc<EphemeralCoordinator> {
    let mut layout = BTreeMap::new();
    layout.insert(
        base.to_string(),
        (1..=n).map(|i| format!("{base}_process_{i}")).collect(),
    );
    Arc::new(EphemeralCoordinator::with_clones(layout))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clones_isolate_concurrent_instances() {
    let server = Arc::new(ScriptedServer::default());
    let runner = Runner {
        backend: server.clone(),
        coordinator: Some(clones("shop", 2)),
        policy: policy(4),
    };
    let records: Vec<_> = (0..8)
        .map(|i| record(i, "shop", if i % 2 == 0 { "good" } else { "meh" }))
        .collect();

    let run = runner.run_suite(records).await.unwrap();

    assert!(server.overlaps.lock().unwrap().is_empty());
    let resets = server.resets.lock().unwrap().clone();
    assert_eq!(resets.len(), 16);
    assert!(resets.iter().all(|db| db.starts_with("shop_process_")));

    let ids: Vec<_> = run.outcomes.iter().map(|o| o.instance_id.clone()).collect();
    let expected: Vec<_> = (0..8).map(|i| format!("q{i}")).collect();
    assert_eq!(ids, expected);
    assert_eq!(run.report.total, 8);
    assert_eq!(run.report.passed, 4);
    assert_eq!(run.report.assertion_errors, 4);
    assert!(run.multi_worker);
}

#[tokio::test]
async fn without_clones_instances_run_in_place_one_at_a_time() {
    let server = Arc::new(ScriptedServer::default());
    let runner = Runner {
        backend: server.clone(),
        coordinator: None,
        policy: policy(8),
    };
    let run = runner
        .run_suite(vec![record(0, "shop", "good"), record(1, "crm", "good")])
        .await
        .unwrap();

    assert!(!run.multi_worker);
    assert_eq!(
        *server.resets.lock().unwrap(),
        vec!["shop", "shop", "crm", "crm"]
    );
    assert_eq!(run.report.accuracy(), 100.0);
}

#[tokio::test]
async fn missing_clone_base_becomes_an_instance_error() {
    let server = Arc::new(ScriptedServer::default());
    let runner = Runner {
        backend: server.clone(),
        coordinator: Some(clones("shop", 1)),
        policy: RunPolicy {
            borrow_timeout: Duration::from_millis(50),
            ..policy(1)
        },
    };
    let run = runner
        .run_suite(vec![record(0, "crm", "good"), record(1, "shop", "good")])
        .await
        .unwrap();

    assert!(run.outcomes[0].infra_error.is_some());
    assert!(run.outcomes[0].execution_error);
    assert!(run.outcomes[1].passed());
    assert_eq!(run.report.execution_errors, 1);
}

#[tokio::test]
async fn failed_reset_halts_the_run() {
    let server = Arc::new(ScriptedServer::default());
    let runner = Runner {
        backend: server.clone(),
        coordinator: None,
        policy: policy(1),
    };
    let err = runner
        .run_suite(vec![
            record(0, "shop", "good"),
            record(1, "broken", "good"),
            record(2, "crm", "good"),
        ])
        .await
        .unwrap_err();

    assert!(err.to_string().contains("run aborted"), "{err:#}");
    let resets = server.resets.lock().unwrap().clone();
    assert!(!resets.contains(&"crm".to_string()), "{resets:?}");
}

#[tokio::test]
async fn dropping_the_suite_aborts_running_instances() {
    let server = Arc::new(ScriptedServer::default());
    let runner = Runner {
        backend: server.clone(),
        coordinator: None,
        policy: policy(1),
    };
    let suite = runner.run_suite(vec![record(0, "stuck", "good")]);
    assert!(tokio::time::timeout(Duration::from_millis(100), suite)
        .await
        .is_err());

    for _ in 0..50 {
        if server.abandoned.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.abandoned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn undecodable_record_fails_alone() {
    let server = Arc::new(ScriptedServer::default());
    let runner = Runner {
        backend: server.clone(),
        coordinator: None,
        policy: policy(1),
    };
    let bad = InstanceRecord::from_value_lenient(
        1,
        json!({"instance_id": "q1", "selected_database": 7, "category": "Query"}),
    );
    let run = runner
        .run_suite(vec![record(0, "shop", "good"), bad, record(2, "crm", "good")])
        .await
        .unwrap();

    assert!(run.outcomes[0].passed());
    assert!(run.outcomes[2].passed());
    let failed = &run.outcomes[1];
    assert_eq!(failed.instance_id, "q1");
    assert!(failed
        .infra_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("invalid instance"));
    assert_eq!(
        *server.resets.lock().unwrap(),
        vec!["shop", "shop", "crm", "crm"]
    );
}
