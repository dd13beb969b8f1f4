use super::scenario::ScenarioBackend;
use crate::db::{DbConn, PoolManager};
use crate::errors::HarnessError;
use crate::executor::{BatchKind, BatchOutcome, QueryExecutor};
use crate::helpers_api::{HelperContext, HelperRegistry, RegistryHost};
use crate::reset::DatabaseRestorer;
use crate::testcase::{run_all, TestCaseExecutor, TestCaseInput, TestCaseSummary};
use async_trait::async_trait;
use std::sync::Arc;

/// Backend that runs scenarios against a real server.
pub struct LiveBackend {
    pub pools: Arc<PoolManager>,
    pub executor: Arc<QueryExecutor>,
    pub restorer: Arc<dyn DatabaseRestorer>,
    pub tests: Arc<dyn TestCaseExecutor>,
    pub helpers: HelperRegistry,
}

#[async_trait]
impl ScenarioBackend for LiveBackend {
    type Session = DbConn;

    async fn reset(&self, db: &str) -> Result<(), HarnessError> {
        self.restorer.reset(db).await
    }

    async fn open_session(&self, db: &str) -> Result<DbConn, HarnessError> {
        self.pools.acquire(db).await
    }

    async fn execute(
        &self,
        session: &mut DbConn,
        db: &str,
        statements: &[String],
        kind: BatchKind,
    ) -> BatchOutcome {
        self.executor
            .execute_batch(session, db, statements, kind)
            .await
    }

    async fn run_test_cases(
        &self,
        session: &mut DbConn,
        cases: &[String],
        input: &TestCaseInput,
    ) -> TestCaseSummary {
        let mut host = RegistryHost {
            registry: &self.helpers,
            ctx: HelperContext {
                conn: session,
                executor: &self.executor,
                db_name: &input.db_name,
            },
        };
        run_all(self.tests.as_ref(), cases, input, &mut host).await
    }
}
