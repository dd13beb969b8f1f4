use crate::db::DbConn;
use crate::executor::QueryExecutor;
use crate::testcase::HelperHost;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a helper may touch while serving a test case.
pub struct HelperContext<'a> {
    pub conn: &'a mut DbConn,
    pub executor: &'a QueryExecutor,
    pub db_name: &'a str,
}

#[async_trait]
pub trait Helper: Send + Sync {
    fn name(&self) -> &'static str;
    async fn call(&self, args: &Value, ctx: &mut HelperContext<'_>) -> anyhow::Result<Value>;
}

#[derive(Clone, Default)]
pub struct HelperRegistry {
    helpers: HashMap<&'static str, Arc<dyn Helper>>,
}

impl HelperRegistry {
    pub fn new(helpers: Vec<Arc<dyn Helper>>) -> Self {
        Self {
            helpers: helpers.into_iter().map(|h| (h.name(), h)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Helper>> {
        self.helpers.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut v: Vec<_> = self.helpers.keys().copied().collect();
        v.sort_unstable();
        v
    }
}

/// Serves helper calls from a registry against one phase connection.
pub struct RegistryHost<'a> {
    pub registry: &'a HelperRegistry,
    pub ctx: HelperContext<'a>,
}

#[async_trait]
impl HelperHost for RegistryHost<'_> {
    async fn call(&mut self, name: &str, args: &Value) -> anyhow::Result<Value> {
        let helper = self
            .registry
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown helper: {name}"))?
            .clone();
        tracing::debug!(event = "helper_call", helper = name, db = self.ctx.db_name);
        helper.call(args, &mut self.ctx).await
    }

    fn connection_lost(&self) -> bool {
        self.ctx.conn.is_broken()
    }
}

/// Reads a statement list argument; a bare string counts as one statement.
pub fn arg_statements(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

pub fn arg_str<'v>(args: &'v Value, key: &str) -> anyhow::Result<&'v str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing string argument `{key}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statement_args_accept_lists_and_strings() {
        let a = json!({"pred_sqls": ["SELECT 1", 2, "SELECT 3"], "one": "SELECT 4"});
        assert_eq!(arg_statements(&a, "pred_sqls"), vec!["SELECT 1", "SELECT 3"]);
        assert_eq!(arg_statements(&a, "one"), vec!["SELECT 4"]);
        assert!(arg_statements(&a, "missing").is_empty());
        assert!(arg_str(&a, "pred_sqls").is_err());
    }
}
