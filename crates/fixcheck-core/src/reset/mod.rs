pub mod admin;
pub mod mysql;
pub mod postgres;

use crate::errors::HarnessError;
use async_trait::async_trait;
use regex::Regex;

pub use admin::AdminCommand;
pub use mysql::MySqlDumpRestorer;
pub use postgres::PgTemplateRestorer;

pub const CLONE_MARKER: &str = "_process_";
pub const TEMPLATE_SUFFIX: &str = "_template";

/// Brings databases back to their template state.
#[async_trait]
pub trait DatabaseRestorer: Send + Sync {
    /// Close the pool, terminate sessions, drop, recreate from the template.
    async fn reset(&self, db: &str) -> Result<(), HarnessError>;
    async fn create_clone(&self, base: &str, clone: &str) -> Result<(), HarnessError>;
    async fn drop_database(&self, db: &str) -> Result<(), HarnessError>;
    async fn list_databases(&self) -> Result<Vec<String>, HarnessError>;
}

/// `shop_process_3` -> `shop`; names without the marker are their own base.
pub fn base_name(db: &str) -> &str {
    db.split(CLONE_MARKER).next().unwrap_or(db)
}

pub fn template_name(db: &str) -> String {
    format!("{}{}", base_name(db), TEMPLATE_SUFFIX)
}

pub fn clone_name(base: &str, n: usize) -> String {
    format!("{base}{CLONE_MARKER}{n}")
}

pub fn is_clone(db: &str) -> bool {
    db.contains(CLONE_MARKER)
}

/// Names are interpolated into admin SQL, so only plain identifiers pass.
#[derive(Debug, Clone)]
pub struct NameGuard {
    pattern: Regex,
}

impl NameGuard {
    pub fn new() -> Result<Self, HarnessError> {
        let pattern = Regex::new(r"^[A-Za-z0-9_]{1,63}$")
            .map_err(|e| HarnessError::InvalidDatabaseName(e.to_string()))?;
        Ok(Self { pattern })
    }

    pub fn check<'a>(&self, name: &'a str) -> Result<&'a str, HarnessError> {
        if self.pattern.is_match(name) {
            Ok(name)
        } else {
            Err(HarnessError::InvalidDatabaseName(name.to_string()))
        }
    }
}

pub(crate) fn wrap_reset(db: &str, res: Result<(), HarnessError>) -> Result<(), HarnessError> {
    res.map_err(|e| HarnessError::Reset {
        db: db.to_string(),
        source: Box::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_names_map_back_to_template() {
        let c = clone_name("european_football_2", 3);
        assert_eq!(c, "european_football_2_process_3");
        assert!(is_clone(&c));
        assert_eq!(base_name(&c), "european_football_2");
        assert_eq!(template_name(&c), "european_football_2_template");
        assert_eq!(template_name("shop"), "shop_template");
    }

    #[test]
    fn guard_rejects_quoting_tricks() {
        let g = NameGuard::new().unwrap();
        assert!(g.check("shop_process_1").is_ok());
        assert!(g.check("shop'; DROP DATABASE x; --").is_err());
        assert!(g.check("").is_err());
        assert!(g.check("a`b").is_err());
    }

    #[test]
    fn reset_errors_become_fatal() {
        let e = wrap_reset(
            "shop",
            Err(HarnessError::InvalidDatabaseName("x".into())),
        )
        .unwrap_err();
        assert!(e.is_fatal());
    }
}
