use super::{template_name, wrap_reset, AdminCommand, DatabaseRestorer, NameGuard};
use crate::config::ServerSettings;
use crate::db::PoolManager;
use crate::errors::HarnessError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Resets by dropping the database and recreating it with
/// `createdb --template <base>_template`.
pub struct PgTemplateRestorer {
    server: ServerSettings,
    pools: Arc<PoolManager>,
    timeout: Duration,
    guard: NameGuard,
}

impl PgTemplateRestorer {
    pub fn new(
        server: ServerSettings,
        pools: Arc<PoolManager>,
        timeout: Duration,
    ) -> Result<Self, HarnessError> {
        Ok(Self {
            server,
            pools,
            timeout,
            guard: NameGuard::new()?,
        })
    }

    fn maintenance_db(&self) -> &str {
        self.server.maintenance_db.as_deref().unwrap_or("postgres")
    }

    fn client(&self, program: &str) -> AdminCommand {
        AdminCommand::new(program, self.timeout)
            .args(["-h", self.server.host.as_str()])
            .args(["-p".to_string(), self.server.port.to_string()])
            .args(["-U", self.server.user.as_str()])
            .env("PGPASSWORD", &self.server.password)
    }

    pub fn terminate_command(&self, db: &str) -> AdminCommand {
        self.client("psql").args(["-d", self.maintenance_db()]).args([
            "-c".to_string(),
            format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = '{db}' AND pid <> pg_backend_pid();"
            ),
        ])
    }

    pub fn drop_command(&self, db: &str) -> AdminCommand {
        self.client("dropdb").arg("--if-exists").arg(db)
    }

    pub fn create_command(&self, db: &str, template: &str) -> AdminCommand {
        self.client("createdb").arg(db).args(["--template", template])
    }

    async fn recreate(&self, db: &str, template: &str) -> Result<(), HarnessError> {
        self.pools.close_pool(db).await;
        self.terminate_command(db).run().await?;
        self.drop_command(db).run().await?;
        self.create_command(db, template).run().await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseRestorer for PgTemplateRestorer {
    async fn reset(&self, db: &str) -> Result<(), HarnessError> {
        let db = self.guard.check(db)?;
        let template = template_name(db);
        let res = self.recreate(db, &template).await;
        if res.is_ok() {
            tracing::info!(event = "db_reset", db, template = %template);
        }
        wrap_reset(db, res)
    }

    async fn create_clone(&self, base: &str, clone: &str) -> Result<(), HarnessError> {
        self.guard.check(base)?;
        let clone = self.guard.check(clone)?;
        self.recreate(clone, &template_name(base)).await
    }

    async fn drop_database(&self, db: &str) -> Result<(), HarnessError> {
        let db = self.guard.check(db)?;
        self.pools.close_pool(db).await;
        self.terminate_command(db).run().await?;
        self.drop_command(db).run().await?;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>, HarnessError> {
        let out = self
            .client("psql")
            .args(["-d", self.maintenance_db()])
            .args(["-A", "-t", "-c", "SELECT datname FROM pg_database WHERE NOT datistemplate"])
            .run()
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
