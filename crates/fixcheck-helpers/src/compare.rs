use fixcheck_core::db::value::{row_key, Rows, SqlValue};
use std::collections::HashSet;

/// Drops every whitespace-delimited `DISTINCT` token, any case. Whitespace
/// is collapsed to single spaces.
pub fn remove_distinct(sqls: &[String]) -> Vec<String> {
    sqls.iter()
        .map(|q| {
            q.split_whitespace()
                .filter(|t| !t.eq_ignore_ascii_case("distinct"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// 1 when every keyword appears (case-insensitively) somewhere in the
/// statements, else 0. No statements means 0.
pub fn check_sql_function_usage(sqls: &[String], required: &[String]) -> i64 {
    if sqls.is_empty() {
        return 0;
    }
    let combined = sqls
        .iter()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    i64::from(required.iter().all(|kw| combined.contains(&kw.to_lowercase())))
}

/// Dates and timestamps become `YYYY-MM-DD` text; everything else is kept.
pub fn preprocess_results(rows: &Rows) -> Rows {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|v| match v {
                    SqlValue::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
                    SqlValue::DateTime(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
                    other => other.clone(),
                })
                .collect()
        })
        .collect()
}

/// Set equality of two result sets after preprocessing. Row order and
/// duplicates are ignored.
pub fn rows_equivalent(a: &Rows, b: &Rows) -> bool {
    let keys = |rows: &Rows| -> HashSet<String> { preprocess_results(rows).iter().map(row_key).collect() };
    keys(a) == keys(b)
}
