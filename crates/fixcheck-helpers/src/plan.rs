use fixcheck_core::db::SqlValue;
use fixcheck_core::model::Dialect;
use serde_json::Value;

const COSTED_PREFIXES: [&str; 5] = ["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"];

/// Only DML gets an EXPLAIN; anything else is just executed.
pub fn is_costed(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    COSTED_PREFIXES.iter().any(|p| upper.starts_with(p))
}

pub fn explain_statement(dialect: Dialect, sql: &str) -> String {
    match dialect {
        Dialect::Postgresql => format!("EXPLAIN (FORMAT JSON) {sql}"),
        Dialect::Mysql => format!("EXPLAIN FORMAT=JSON {sql}"),
    }
}

/// Reads the planner's total cost from the first cell of an EXPLAIN result.
///
/// PostgreSQL reports `[{"Plan": {"Total Cost": n}}]`; MySQL reports
/// `{"query_block": {"cost_info": {"query_cost": "n"}}}` with the cost as a
/// string.
pub fn extract_plan_cost(dialect: Dialect, cell: &SqlValue) -> Option<f64> {
    let doc = match cell {
        SqlValue::Json(v) => v.clone(),
        SqlValue::Text(s) => serde_json::from_str(s).ok()?,
        SqlValue::Bytes(b) => serde_json::from_slice(b).ok()?,
        _ => return None,
    };
    let cost = match dialect {
        Dialect::Postgresql => doc.pointer("/0/Plan/Total Cost")?,
        Dialect::Mysql => doc.pointer("/query_block/cost_info/query_cost")?,
    };
    as_number(cost)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn postgres_total_cost() {
        let cell = SqlValue::Json(json!([{"Plan": {"Node Type": "Seq Scan", "Total Cost": 35.5}}]));
        assert_eq!(extract_plan_cost(Dialect::Postgresql, &cell), Some(35.5));
    }

    #[test]
    fn mysql_query_cost_from_text() {
        let cell = SqlValue::Text(r#"{"query_block": {"cost_info": {"query_cost": "7.99"}}}"#.into());
        assert_eq!(extract_plan_cost(Dialect::Mysql, &cell), Some(7.99));
        assert_eq!(extract_plan_cost(Dialect::Postgresql, &cell), None);
    }

    #[test]
    fn only_dml_is_costed() {
        assert!(is_costed("  select 1"));
        assert!(is_costed("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_costed("CREATE INDEX i ON t(a)"));
        assert_eq!(
            explain_statement(Dialect::Mysql, "SELECT 1"),
            "EXPLAIN FORMAT=JSON SELECT 1"
        );
    }
}
