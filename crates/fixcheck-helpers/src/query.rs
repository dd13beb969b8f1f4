use crate::compare::{check_sql_function_usage, preprocess_results, remove_distinct, rows_equivalent};
use crate::plan::{explain_statement, extract_plan_cost, is_costed};
use async_trait::async_trait;
use fixcheck_core::db::value::{rows_from_wire, rows_to_wire};
use fixcheck_core::executor::BatchKind;
use fixcheck_core::helpers_api::{arg_statements, arg_str, Helper, HelperContext};
use serde_json::{json, Value};

/// Runs one statement; errors surface in the test case as exceptions.
pub struct PerformQuery;

#[async_trait]
impl Helper for PerformQuery {
    fn name(&self) -> &'static str {
        "perform_query"
    }

    async fn call(&self, args: &Value, ctx: &mut HelperContext<'_>) -> anyhow::Result<Value> {
        let query = arg_str(args, "query")?;
        let out = ctx.executor.perform(ctx.conn, query).await?;
        Ok(out.rows.as_ref().map(rows_to_wire).unwrap_or(Value::Null))
    }
}

/// Runs a statement list and reports its flags. Solution batches stop at
/// the first failure and flag it; anything else (`is_solution: false`) runs
/// leniently, like setup SQL.
pub struct ExecuteQueries;

/// `is_solution` defaults to true when absent.
pub fn requested_batch_kind(args: &Value) -> BatchKind {
    match args.get("is_solution").and_then(Value::as_bool) {
        Some(false) => BatchKind::Lenient,
        _ => BatchKind::Critical,
    }
}

#[async_trait]
impl Helper for ExecuteQueries {
    fn name(&self) -> &'static str {
        "execute_queries"
    }

    async fn call(&self, args: &Value, ctx: &mut HelperContext<'_>) -> anyhow::Result<Value> {
        let queries = arg_statements(args, "queries");
        let out = ctx
            .executor
            .execute_batch(ctx.conn, ctx.db_name, &queries, requested_batch_kind(args))
            .await;
        Ok(json!({
            "result": out.result.as_ref().map(rows_to_wire),
            "execution_error": out.execution_error,
            "timeout_error": out.timeout_error,
            "error_message": out.error_message().unwrap_or_default(),
        }))
    }
}

/// 1 when both statement lists run cleanly, return non-empty results, and
/// those results are equal as sets.
pub struct ExBase;

#[async_trait]
impl Helper for ExBase {
    fn name(&self) -> &'static str {
        "ex_base"
    }

    async fn call(&self, args: &Value, ctx: &mut HelperContext<'_>) -> anyhow::Result<Value> {
        let pred = arg_statements(args, "pred_sqls");
        let sol = arg_statements(args, "sol_sqls");
        if pred.is_empty() || sol.is_empty() {
            return Ok(json!(0));
        }
        let p = ctx
            .executor
            .execute_batch(ctx.conn, ctx.db_name, &pred, BatchKind::Critical)
            .await;
        let s = ctx
            .executor
            .execute_batch(ctx.conn, ctx.db_name, &sol, BatchKind::Critical)
            .await;
        if p.failed() || s.failed() {
            return Ok(json!(0));
        }
        let same = match (&p.result, &s.result) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => rows_equivalent(a, b),
            _ => false,
        };
        Ok(json!(i64::from(same)))
    }
}

/// 1 when the planner's summed cost for `sol_sqls` is below `old_sqls`.
pub struct PerformanceCompareByQep;

impl PerformanceCompareByQep {
    async fn measure(ctx: &mut HelperContext<'_>, sqls: &[String]) -> f64 {
        let dialect = ctx.executor.dialect();
        let mut total = 0.0;
        for sql in sqls {
            if !is_costed(sql) {
                if let Err(e) = ctx.executor.perform_uncommitted(ctx.conn, sql).await {
                    tracing::debug!(event = "qep_setup_failed", sql = %sql, error = %e);
                }
                continue;
            }
            let explain = explain_statement(dialect, sql);
            match ctx.executor.perform_uncommitted(ctx.conn, &explain).await {
                Ok(out) => {
                    let cell = out.rows.as_ref().and_then(|r| r.first()).and_then(|r| r.first());
                    match cell.and_then(|c| extract_plan_cost(dialect, c)) {
                        Some(cost) => total += cost,
                        None => tracing::debug!(event = "qep_cost_missing", sql = %sql),
                    }
                }
                Err(e) => tracing::debug!(event = "qep_explain_failed", sql = %sql, error = %e),
            }
        }
        total
    }

    /// Each side is measured inside a rolled-back transaction so both start
    /// from the same state.
    async fn measure_isolated(ctx: &mut HelperContext<'_>, sqls: &[String]) -> f64 {
        if let Err(e) = ctx.executor.perform_uncommitted(ctx.conn, "BEGIN").await {
            tracing::warn!(event = "qep_begin_failed", error = %e);
        }
        let cost = Self::measure(ctx, sqls).await;
        ctx.executor.rollback(ctx.conn).await;
        cost
    }
}

#[async_trait]
impl Helper for PerformanceCompareByQep {
    fn name(&self) -> &'static str {
        "performance_compare_by_qep"
    }

    async fn call(&self, args: &Value, ctx: &mut HelperContext<'_>) -> anyhow::Result<Value> {
        let old = arg_statements(args, "old_sqls");
        let sol = arg_statements(args, "sol_sqls");
        if old.is_empty() || sol.is_empty() {
            return Ok(json!(0));
        }
        let old_cost = Self::measure_isolated(ctx, &old).await;
        let sol_cost = Self::measure_isolated(ctx, &sol).await;
        tracing::debug!(event = "qep_compared", old_cost, sol_cost);
        Ok(json!(i64::from(sol_cost < old_cost)))
    }
}

pub struct CheckSqlFunctionUsage;

#[async_trait]
impl Helper for CheckSqlFunctionUsage {
    fn name(&self) -> &'static str {
        "check_sql_function_usage"
    }

    async fn call(&self, args: &Value, _ctx: &mut HelperContext<'_>) -> anyhow::Result<Value> {
        let sqls = arg_statements(args, "sqls");
        let keywords = arg_statements(args, "required_keywords");
        Ok(json!(check_sql_function_usage(&sqls, &keywords)))
    }
}

pub struct RemoveDistinct;

#[async_trait]
impl Helper for RemoveDistinct {
    fn name(&self) -> &'static str {
        "remove_distinct"
    }

    async fn call(&self, args: &Value, _ctx: &mut HelperContext<'_>) -> anyhow::Result<Value> {
        Ok(json!(remove_distinct(&arg_statements(args, "sql_list"))))
    }
}

pub struct PreprocessResults;

#[async_trait]
impl Helper for PreprocessResults {
    fn name(&self) -> &'static str {
        "preprocess_results"
    }

    async fn call(&self, args: &Value, _ctx: &mut HelperContext<'_>) -> anyhow::Result<Value> {
        let rows = args
            .get("results")
            .and_then(rows_from_wire)
            .unwrap_or_default();
        Ok(rows_to_wire(&preprocess_results(&rows)))
    }
}
