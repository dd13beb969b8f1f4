use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Failure of a single statement. Timeouts are kept apart from every other
/// database error so the runner can attribute them separately.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecError {
    #[error("statement timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Database(String),
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ExecError::Timeout(m) | ExecError::Database(m) => m,
        }
    }
}

/// Infrastructure failures: anything that is not the SQL under test
/// misbehaving.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("cannot connect to database {db}: {source}")]
    Connectivity {
        db: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("admin command `{command}` failed (exit {code:?}): {stderr}")]
    AdminCommand {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("admin command `{command}` timed out after {timeout:?}")]
    AdminTimeout { command: String, timeout: Duration },

    #[error("failed to reset database {db}: {source}")]
    Reset {
        db: String,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("No available ephemeral databases. (waited {waited:?} for a clone of {base})")]
    CloneUnavailable { base: String, waited: Duration },

    #[error("invalid database name {0:?}")]
    InvalidDatabaseName(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Reset failures leave the database in an unknown state, so the whole run stops.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::Reset { .. })
    }
}
