use crate::errors::ConfigError;
use crate::model::{Dialect, EvalMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
    #[serde(default = "default_mode")]
    pub mode: EvalMode,
    #[serde(default)]
    pub postgresql: ServerSettings,
    #[serde(default = "ServerSettings::mysql_default")]
    pub mysql: ServerSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub test_cases: TestCaseSettings,
    #[serde(default)]
    pub mysql_restore: MySqlRestoreSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            dialect: default_dialect(),
            mode: default_mode(),
            postgresql: ServerSettings::default(),
            mysql: ServerSettings::mysql_default(),
            pool: PoolSettings::default(),
            limits: Limits::default(),
            runner: RunnerSettings::default(),
            test_cases: TestCaseSettings::default(),
            mysql_restore: MySqlRestoreSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

fn default_dialect() -> Dialect {
    Dialect::Postgresql
}

fn default_mode() -> EvalMode {
    EvalMode::Pred
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Database used for administrative connections (`postgres` on PostgreSQL).
    #[serde(default)]
    pub maintenance_db: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "root".into(),
            password: String::new(),
            maintenance_db: Some("postgres".into()),
        }
    }
}

impl ServerSettings {
    fn mysql_default() -> Self {
        Self {
            port: 3306,
            maintenance_db: None,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            acquire_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub statement_timeout_seconds: u64,
    pub max_rows: usize,
    pub test_case_timeout_seconds: u64,
    pub admin_timeout_seconds: u64,
    pub import_timeout_seconds: u64,
    pub clone_borrow_timeout_seconds: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            statement_timeout_seconds: 60,
            max_rows: 10_000,
            test_case_timeout_seconds: 60,
            admin_timeout_seconds: 60,
            import_timeout_seconds: 300,
            clone_borrow_timeout_seconds: 60,
        }
    }
}

impl Limits {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_seconds)
    }
    pub fn test_case_timeout(&self) -> Duration {
        Duration::from_secs(self.test_case_timeout_seconds)
    }
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_seconds)
    }
    pub fn import_timeout(&self) -> Duration {
        Duration::from_secs(self.import_timeout_seconds)
    }
    pub fn clone_borrow_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_borrow_timeout_seconds)
    }
}

/// How efficiency test cases receive their two statement lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyBinding {
    /// `pred_sqls` = error SQL (baseline), `sol_sqls` = the fix.
    ErrorVsCandidate,
    /// `pred_sqls` = the fix (baseline), `sol_sqls` = reference solution.
    CandidateVsReference,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerSettings {
    pub workers: usize,
    pub ephemeral_clones: bool,
    pub efficiency_binding: EfficiencyBinding,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            ephemeral_clones: true,
            efficiency_binding: EfficiencyBinding::ErrorVsCandidate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TestCaseSettings {
    pub interpreter: String,
}

impl Default for TestCaseSettings {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MySqlRestoreSettings {
    /// Directory holding `<db>_template_dump.sql` or per-table `<table>.sql` dumps.
    pub dump_dir: Option<PathBuf>,
    /// Table import order per logical database, used with per-table dumps.
    pub table_order: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 2048,
        }
    }
}

impl HarnessConfig {
    pub fn server(&self, dialect: Dialect) -> &ServerSettings {
        match dialect {
            Dialect::Postgresql => &self.postgresql,
            Dialect::Mysql => &self.mysql,
        }
    }

    /// Environment overrides, applied after the file and before CLI flags.
    pub fn apply_env(&mut self) {
        override_str("FIXCHECK_PG_HOST", &mut self.postgresql.host);
        override_parse("FIXCHECK_PG_PORT", &mut self.postgresql.port);
        override_str("FIXCHECK_PG_USER", &mut self.postgresql.user);
        override_str("FIXCHECK_PG_PASSWORD", &mut self.postgresql.password);
        override_str("FIXCHECK_MYSQL_HOST", &mut self.mysql.host);
        override_parse("FIXCHECK_MYSQL_PORT", &mut self.mysql.port);
        override_str("FIXCHECK_MYSQL_USER", &mut self.mysql.user);
        override_str("FIXCHECK_MYSQL_PASSWORD", &mut self.mysql.password);
        if let Ok(v) = env::var("FIXCHECK_MYSQL_DUMP_DIR") {
            self.mysql_restore.dump_dir = Some(PathBuf::from(v));
        }
        override_parse("FIXCHECK_WORKERS", &mut self.runner.workers);
        override_str("FIXCHECK_PYTHON", &mut self.test_cases.interpreter);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 0 && self.version != SUPPORTED_CONFIG_VERSION {
            return Err(ConfigError(format!(
                "unsupported config version {} (supported: 0, {})",
                self.version, SUPPORTED_CONFIG_VERSION
            )));
        }
        if self.pool.max_connections == 0 || self.pool.min_connections > self.pool.max_connections
        {
            return Err(ConfigError(format!(
                "pool bounds invalid: min {} max {}",
                self.pool.min_connections, self.pool.max_connections
            )));
        }
        if self.limits.max_rows == 0 {
            return Err(ConfigError("limits.max_rows must be positive".into()));
        }
        Ok(())
    }
}

fn override_str(key: &str, slot: &mut String) {
    if let Ok(v) = env::var(key) {
        *slot = v;
    }
}

fn override_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = env::var(key) {
        if let Ok(n) = v.parse() {
            *slot = n;
        }
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<HarnessConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict, &path.display().to_string())
}

pub fn parse_config(raw: &str, strict: bool, origin: &str) -> Result<HarnessConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: HarnessConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let meaningful_unknowns: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !meaningful_unknowns.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?} (file: {})",
                meaningful_unknowns, origin
            )));
        }
        tracing::warn!(
            event = "config_unknown_fields",
            fields = ?meaningful_unknowns,
            file = origin,
            "ignored unknown config fields"
        );
    }

    cfg.validate()?;
    Ok(cfg)
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(
        path,
        r#"version: 1
dialect: postgresql
mode: pred
postgresql:
  host: localhost
  port: 5432
  user: root
  password: ""          # or FIXCHECK_PG_PASSWORD
  maintenance_db: postgres
mysql:
  host: localhost
  port: 3306
  user: root
  password: ""          # or FIXCHECK_MYSQL_PASSWORD
pool:
  min_connections: 1
  max_connections: 5
limits:
  statement_timeout_seconds: 60
  max_rows: 10000
  test_case_timeout_seconds: 60
  admin_timeout_seconds: 60
  import_timeout_seconds: 300
  clone_borrow_timeout_seconds: 60
runner:
  workers: 4
  ephemeral_clones: true
  efficiency_binding: error_vs_candidate
test_cases:
  interpreter: python3
mysql_restore:
  dump_dir: null
  table_order: {}
"#,
    )
    .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
