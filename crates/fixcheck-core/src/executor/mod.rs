pub mod classify;

use crate::db::{DbConn, Rows};
use crate::errors::ExecError;
use crate::model::Dialect;
use classify::{returns_rows, KeywordClassifier, WriteClassifier};
use sqlx::mysql::MySqlDatabaseError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const POSTGRES_QUERY_CANCELED: &str = "57014";
const MYSQL_EXECUTION_TIME_EXCEEDED: u16 = 3024;

// Slack on top of the server-side limit before the client gives up.
const CLIENT_GRACE: Duration = Duration::from_secs(5);
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(10);

pub const BROKEN_CONNECTION: &str = "connection lost: an earlier statement was abandoned mid-flight";

#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    pub statement_timeout: Duration,
    pub max_rows: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(60),
            max_rows: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// `None` for statements that produce no result set.
    pub rows: Option<Rows>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Error SQL and fixes: the first failure sets a flag and stops the batch.
    Critical,
    /// Preprocess and cleanup: failures are logged and the batch continues.
    Lenient,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementFailure {
    pub index: usize,
    pub error: ExecError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub result: Option<Rows>,
    pub truncated: bool,
    pub execution_error: bool,
    pub timeout_error: bool,
    pub failure: Option<StatementFailure>,
}

impl BatchOutcome {
    pub fn failed(&self) -> bool {
        self.execution_error || self.timeout_error
    }

    pub fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.error.message().to_string())
    }
}

pub struct QueryExecutor {
    dialect: Dialect,
    classifier: Arc<dyn WriteClassifier>,
    limits: ExecLimits,
}

impl QueryExecutor {
    pub fn new(dialect: Dialect, limits: ExecLimits) -> Self {
        Self::with_classifier(
            dialect,
            Arc::new(KeywordClassifier::for_dialect(dialect)),
            limits,
        )
    }

    pub fn with_classifier(
        dialect: Dialect,
        classifier: Arc<dyn WriteClassifier>,
        limits: ExecLimits,
    ) -> Self {
        Self {
            dialect,
            classifier,
            limits,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn limits(&self) -> ExecLimits {
        self.limits
    }

    /// Execute one statement: commit if it writes, roll back if it fails.
    /// A connection cut off by the client deadline is left for its owner to
    /// discard.
    pub async fn perform(&self, conn: &mut DbConn, sql: &str) -> Result<QueryOutput, ExecError> {
        match self.run_limited(conn, sql).await {
            Ok(out) => {
                if self.classifier.is_write(sql) {
                    if let Err(e) = conn.execute_simple("COMMIT").await {
                        tracing::warn!(event = "commit_failed", error = %e);
                    }
                }
                Ok(out)
            }
            Err(err) => {
                self.rollback(conn).await;
                Err(err)
            }
        }
    }

    /// Execute one statement with no commit and no rollback. Used inside an
    /// explicit transaction the caller closes itself.
    pub async fn perform_uncommitted(
        &self,
        conn: &mut DbConn,
        sql: &str,
    ) -> Result<QueryOutput, ExecError> {
        self.run_limited(conn, sql).await
    }

    /// No-op on a broken connection.
    pub async fn rollback(&self, conn: &mut DbConn) {
        if conn.is_broken() {
            return;
        }
        match timeout(ROLLBACK_TIMEOUT, conn.execute_simple("ROLLBACK")).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(event = "rollback_failed", error = %e),
            Err(_) => tracing::warn!(event = "rollback_failed", error = "timed out"),
        }
    }

    pub async fn execute_batch(
        &self,
        conn: &mut DbConn,
        db: &str,
        statements: &[String],
        kind: BatchKind,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, sql) in statements.iter().enumerate() {
            tracing::debug!(event = "statement_start", db, index, sql = %sql);
            match self.perform(conn, sql).await {
                Ok(out) => {
                    tracing::debug!(
                        event = "statement_ok",
                        db,
                        index,
                        rows = out.rows.as_ref().map(|r| r.len()),
                        truncated = out.truncated
                    );
                    outcome.truncated |= out.truncated;
                    outcome.result = out.rows;
                }
                Err(error) => {
                    tracing::warn!(
                        event = "statement_failed",
                        db,
                        index,
                        kind = ?kind,
                        timeout = error.is_timeout(),
                        error = %error
                    );
                    let timed_out = error.is_timeout();
                    if outcome.failure.is_none() {
                        outcome.failure = Some(StatementFailure { index, error });
                    }
                    if kind == BatchKind::Critical {
                        if timed_out {
                            outcome.timeout_error = true;
                        } else {
                            outcome.execution_error = true;
                        }
                        break;
                    }
                    if conn.is_broken() {
                        tracing::warn!(event = "batch_stopped", db, index, "connection lost");
                        break;
                    }
                }
            }
        }
        outcome
    }

    async fn run_limited(&self, conn: &mut DbConn, sql: &str) -> Result<QueryOutput, ExecError> {
        if conn.is_broken() {
            return Err(ExecError::Database(BROKEN_CONNECTION.to_string()));
        }
        self.apply_session_limit(conn).await?;

        let deadline = self.limits.statement_timeout + CLIENT_GRACE;
        let fetched = match timeout(deadline, conn.fetch_capped(sql, self.limits.max_rows)).await {
            Err(_) => {
                tracing::warn!(
                    event = "client_deadline_exceeded",
                    secs = deadline.as_secs(),
                    "connection will be discarded"
                );
                return Err(ExecError::Timeout(format!(
                    "no response within {}s",
                    deadline.as_secs()
                )));
            }
            Ok(Err(e)) => return Err(classify_error(e)),
            Ok(Ok(f)) => f,
        };

        if fetched.truncated {
            tracing::warn!(
                event = "result_truncated",
                max_rows = self.limits.max_rows,
                "result exceeded the row cap; extra rows dropped"
            );
        }

        let rows = if fetched.saw_rows || returns_rows(sql) {
            Some(fetched.rows)
        } else {
            None
        };
        Ok(QueryOutput {
            rows,
            truncated: fetched.truncated,
        })
    }

    async fn apply_session_limit(&self, conn: &mut DbConn) -> Result<(), ExecError> {
        let stmt = session_limit_statement(self.dialect, self.limits.statement_timeout);
        conn.execute_simple(&stmt).await.map_err(classify_error)
    }
}

pub fn session_limit_statement(dialect: Dialect, limit: Duration) -> String {
    match dialect {
        Dialect::Postgresql => format!("SET statement_timeout = '{}s'", limit.as_secs()),
        Dialect::Mysql => format!("SET SESSION MAX_EXECUTION_TIME={}", limit.as_millis()),
    }
}

pub fn classify_error(e: sqlx::Error) -> ExecError {
    if let sqlx::Error::Database(db) = &e {
        let message = db.message().to_string();
        if db.code().as_deref() == Some(POSTGRES_QUERY_CANCELED) {
            return ExecError::Timeout(message);
        }
        if let Some(my) = db.try_downcast_ref::<MySqlDatabaseError>() {
            if my.number() == MYSQL_EXECUTION_TIME_EXCEEDED {
                return ExecError::Timeout(message);
            }
        }
        return ExecError::Database(message);
    }
    ExecError::Database(e.to_string())
}
