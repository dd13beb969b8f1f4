use super::{base_name, wrap_reset, AdminCommand, DatabaseRestorer, NameGuard, TEMPLATE_SUFFIX};
use crate::config::{MySqlRestoreSettings, ServerSettings};
use crate::db::PoolManager;
use crate::errors::HarnessError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// MySQL has no template databases: resets drop and recreate the schema and
/// replay a SQL dump into it.
pub struct MySqlDumpRestorer {
    server: ServerSettings,
    restore: MySqlRestoreSettings,
    pools: Arc<PoolManager>,
    admin_timeout: Duration,
    import_timeout: Duration,
    guard: NameGuard,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DumpSource {
    /// `<dump_dir>/<base>_template_dump.sql`
    Whole(PathBuf),
    /// Per-table `<dump_dir>/<table>.sql` in dependency order.
    Tables(Vec<PathBuf>),
}

impl MySqlDumpRestorer {
    pub fn new(
        server: ServerSettings,
        restore: MySqlRestoreSettings,
        pools: Arc<PoolManager>,
        admin_timeout: Duration,
        import_timeout: Duration,
    ) -> Result<Self, HarnessError> {
        Ok(Self {
            server,
            restore,
            pools,
            admin_timeout,
            import_timeout,
            guard: NameGuard::new()?,
        })
    }

    fn client(&self, timeout: Duration) -> AdminCommand {
        AdminCommand::new("mysql", timeout)
            .args(["-h", self.server.host.as_str()])
            .args(["-P".to_string(), self.server.port.to_string()])
            .args(["-u", self.server.user.as_str()])
            .env("MYSQL_PWD", &self.server.password)
    }

    fn statement(&self, sql: String) -> AdminCommand {
        self.client(self.admin_timeout).args(["-N", "-B", "-e"]).arg(sql)
    }

    pub fn dump_source(&self, db: &str) -> Result<DumpSource, HarnessError> {
        let base = base_name(db);
        let dir = self.restore.dump_dir.clone().ok_or_else(|| {
            HarnessError::Config(crate::errors::ConfigError(
                "mysql_restore.dump_dir is not set".into(),
            ))
        })?;

        let whole = dir.join(format!("{base}{TEMPLATE_SUFFIX}_dump.sql"));
        if whole.is_file() {
            return Ok(DumpSource::Whole(whole));
        }

        let tables = self.restore.table_order.get(base).ok_or_else(|| {
            HarnessError::Config(crate::errors::ConfigError(format!(
                "no dump {} and no table_order for {base}",
                whole.display()
            )))
        })?;
        let mut files = Vec::new();
        for t in tables {
            let path = dir.join(format!("{t}.sql"));
            if path.is_file() {
                files.push(path);
            } else {
                tracing::warn!(event = "table_dump_missing", db = base, table = %t, path = %path.display());
            }
        }
        Ok(DumpSource::Tables(files))
    }

    async fn terminate_sessions(&self, db: &str) -> Result<(), HarnessError> {
        let ids = self
            .statement(format!(
                "SELECT id FROM information_schema.PROCESSLIST \
                 WHERE db = '{db}' AND id <> CONNECTION_ID()"
            ))
            .run()
            .await?;
        let kills: Vec<String> = ids
            .lines()
            .map(str::trim)
            .filter(|l| l.chars().all(|c| c.is_ascii_digit()) && !l.is_empty())
            .map(|id| format!("KILL {id};"))
            .collect();
        if kills.is_empty() {
            return Ok(());
        }
        // A session may finish between lookup and kill.
        if let Err(e) = self.statement(kills.join(" ")).run().await {
            tracing::warn!(event = "session_kill_failed", db, error = %e);
        }
        Ok(())
    }

    async fn import(&self, db: &str) -> Result<(), HarnessError> {
        match self.dump_source(db)? {
            DumpSource::Whole(path) => {
                self.client(self.import_timeout)
                    .arg(db)
                    .stdin_from(path)
                    .run()
                    .await?;
            }
            DumpSource::Tables(files) => {
                for path in files {
                    self.client(self.import_timeout)
                        .arg(db)
                        .stdin_from(path)
                        .run()
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn recreate(&self, db: &str) -> Result<(), HarnessError> {
        self.pools.close_pool(db).await;
        self.terminate_sessions(db).await?;
        self.statement(format!("DROP DATABASE IF EXISTS `{db}`"))
            .run()
            .await?;
        self.statement(format!("CREATE DATABASE `{db}`")).run().await?;
        self.import(db).await
    }
}

#[async_trait]
impl DatabaseRestorer for MySqlDumpRestorer {
    async fn reset(&self, db: &str) -> Result<(), HarnessError> {
        let db = self.guard.check(db)?;
        let res = self.recreate(db).await;
        if res.is_ok() {
            tracing::info!(event = "db_reset", db);
        }
        wrap_reset(db, res)
    }

    async fn create_clone(&self, base: &str, clone: &str) -> Result<(), HarnessError> {
        self.guard.check(base)?;
        let clone = self.guard.check(clone)?;
        self.recreate(clone).await
    }

    async fn drop_database(&self, db: &str) -> Result<(), HarnessError> {
        let db = self.guard.check(db)?;
        self.pools.close_pool(db).await;
        self.terminate_sessions(db).await?;
        self.statement(format!("DROP DATABASE IF EXISTS `{db}`"))
            .run()
            .await?;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>, HarnessError> {
        let out = self.statement("SHOW DATABASES".into()).run().await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
