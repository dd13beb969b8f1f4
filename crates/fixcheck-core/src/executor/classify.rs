use crate::model::Dialect;

/// Decides whether a statement changes state and must be committed.
pub trait WriteClassifier: Send + Sync {
    fn is_write(&self, sql: &str) -> bool;
}

pub const POSTGRES_WRITE_KEYWORDS: &[&str] = &[
    "insert",
    "update",
    "delete",
    "create",
    "drop",
    "alter",
    "truncate",
    "comment",
    "copy",
    "grant",
    "revoke",
    "analyze",
    "vacuum",
    "cluster",
    "reindex",
    "declare",
    "execute",
    "explain analyze",
    "listen",
    "notify",
    "load",
    "lock",
    "prepare transaction",
    "commit prepared",
    "rollback prepared",
    "reassign owned",
    "refresh materialized view",
    "security label",
];

pub const MYSQL_WRITE_KEYWORDS: &[&str] = &[
    "insert",
    "update",
    "delete",
    "create",
    "drop",
    "alter",
    "truncate",
    "rename",
    "replace",
    "grant",
    "revoke",
    "lock tables",
    "unlock tables",
    "start transaction",
    "begin",
    "commit",
    "rollback",
    "call",
    "load data",
    "set",
    "do",
    "handler",
    "load xml",
    "merge",
    "prepare",
    "execute",
    "deallocate prepare",
    "xa",
];

/// Substring match against a keyword list, so a SELECT mentioning
/// `update_time` also counts as a write.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<String>,
}

impl KeywordClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Postgresql => Self::new(POSTGRES_WRITE_KEYWORDS.iter().copied()),
            Dialect::Mysql => Self::new(MYSQL_WRITE_KEYWORDS.iter().copied()),
        }
    }
}

impl WriteClassifier for KeywordClassifier {
    fn is_write(&self, sql: &str) -> bool {
        let lowered = sql.trim().to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

/// Whether a statement produces a result set even when it matched no rows.
pub fn returns_rows(sql: &str) -> bool {
    let lowered = sql.trim_start().to_lowercase();
    let first = lowered
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|t| !t.is_empty())
        .unwrap_or("");
    matches!(
        first,
        "select" | "with" | "show" | "explain" | "values" | "table" | "describe" | "desc"
    ) || lowered.contains(" returning ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_commits_ddl_and_dml() {
        let c = KeywordClassifier::for_dialect(Dialect::Postgresql);
        assert!(c.is_write("  INSERT INTO t VALUES (1)"));
        assert!(c.is_write("REFRESH MATERIALIZED VIEW mv"));
        assert!(c.is_write("explain analyze select 1"));
        assert!(!c.is_write("SELECT a FROM t"));
        // `set` is not a postgres write keyword
        assert!(!c.is_write("SET search_path TO public"));
    }

    #[test]
    fn mysql_list_includes_session_statements() {
        let c = KeywordClassifier::for_dialect(Dialect::Mysql);
        assert!(c.is_write("SET @x = 1"));
        assert!(c.is_write("CALL refresh_totals()"));
        assert!(c.is_write("xa start 'x'"));
        assert!(!c.is_write("SELECT 1"));
    }

    #[test]
    fn custom_keyword_lists_replace_the_defaults() {
        let c = KeywordClassifier::new(["merge"]);
        assert!(c.is_write("MERGE INTO t USING s ON true"));
        assert!(!c.is_write("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn row_shape_detection() {
        assert!(returns_rows("SELECT * FROM t WHERE false"));
        assert!(returns_rows("(select 1)"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("DELETE FROM t WHERE id = 1 RETURNING id"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("CREATE TABLE t (id int)"));
    }
}
