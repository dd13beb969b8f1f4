use crate::config::{PoolSettings, ServerSettings};
use crate::errors::HarnessError;
use crate::model::Dialect;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{MySql, Postgres};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl DbPool {
    async fn close(&self) {
        match self {
            DbPool::Postgres(p) => p.close().await,
            DbPool::MySql(p) => p.close().await,
        }
    }
}

pub(crate) enum Pooled {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
}

/// A pooled connection. Dropping it hands it back to its pool, unless a
/// statement on it was abandoned mid-flight: then the connection is closed
/// and the pool opens a replacement.
pub struct DbConn {
    pub(crate) inner: Pooled,
    pub(crate) in_flight: bool,
}

impl DbConn {
    fn new(inner: Pooled) -> Self {
        Self {
            inner,
            in_flight: false,
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self.inner {
            Pooled::Postgres(_) => Dialect::Postgresql,
            Pooled::MySql(_) => Dialect::Mysql,
        }
    }

    /// A statement future was dropped before it completed, so the protocol
    /// state of this connection is unknown.
    pub fn is_broken(&self) -> bool {
        self.in_flight
    }
}

impl Drop for DbConn {
    fn drop(&mut self) {
        if !self.in_flight {
            return;
        }
        match &mut self.inner {
            Pooled::Postgres(c) => c.close_on_drop(),
            Pooled::MySql(c) => c.close_on_drop(),
        }
        tracing::debug!(event = "connection_discarded", dialect = %self.dialect());
    }
}

/// Registry of one connection pool per database name.
///
/// The registry lock covers map lookups and inserts only. Pools are built
/// and connections checked out without it, so a slow server for one
/// database never stalls acquires or closes on another.
pub struct PoolManager {
    dialect: Dialect,
    server: ServerSettings,
    settings: PoolSettings,
    pools: Mutex<HashMap<String, DbPool>>,
}

impl PoolManager {
    pub fn new(dialect: Dialect, server: ServerSettings, settings: PoolSettings) -> Self {
        Self {
            dialect,
            server,
            settings,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn server(&self) -> &ServerSettings {
        &self.server
    }

    pub async fn acquire(&self, db: &str) -> Result<DbConn, HarnessError> {
        let pool = self.pool_for(db).await?;
        let conn = match pool {
            DbPool::Postgres(p) => p.acquire().await.map(|c| DbConn::new(Pooled::Postgres(c))),
            DbPool::MySql(p) => p.acquire().await.map(|c| DbConn::new(Pooled::MySql(c))),
        };
        conn.map_err(|source| HarnessError::Connectivity {
            db: db.to_string(),
            source,
        })
    }

    pub fn release(&self, conn: DbConn) {
        drop(conn);
    }

    pub async fn close_pool(&self, db: &str) {
        let removed = self.pools.lock().await.remove(db);
        if let Some(pool) = removed {
            pool.close().await;
            tracing::debug!(event = "pool_closed", db);
        }
    }

    pub async fn close_all_pools(&self) {
        let drained: Vec<(String, DbPool)> = self.pools.lock().await.drain().collect();
        for (db, pool) in drained {
            pool.close().await;
            tracing::debug!(event = "pool_closed", db = %db);
        }
    }

    pub async fn open_pools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn pool_for(&self, db: &str) -> Result<DbPool, HarnessError> {
        if let Some(p) = self.pools.lock().await.get(db) {
            return Ok(p.clone());
        }
        let created = self.connect(db).await?;

        let (pool, lost_race) = {
            let mut pools = self.pools.lock().await;
            match pools.get(db) {
                Some(existing) => (existing.clone(), true),
                None => {
                    pools.insert(db.to_string(), created.clone());
                    (created.clone(), false)
                }
            }
        };
        if lost_race {
            created.close().await;
        } else {
            tracing::debug!(event = "pool_created", db, max = self.settings.max_connections);
        }
        Ok(pool)
    }

    // connect_with opens one connection up front, so an unreachable server
    // surfaces here instead of on first use.
    async fn connect(&self, db: &str) -> Result<DbPool, HarnessError> {
        let s = &self.server;
        let acquire_timeout = Duration::from_secs(self.settings.acquire_timeout_seconds);
        let res = match self.dialect {
            Dialect::Postgresql => {
                let opts = PgConnectOptions::new()
                    .host(&s.host)
                    .port(s.port)
                    .username(&s.user)
                    .password(&s.password)
                    .database(db);
                PgPoolOptions::new()
                    .min_connections(self.settings.min_connections)
                    .max_connections(self.settings.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect_with(opts)
                    .await
                    .map(DbPool::Postgres)
            }
            Dialect::Mysql => {
                let opts = MySqlConnectOptions::new()
                    .host(&s.host)
                    .port(s.port)
                    .username(&s.user)
                    .password(&s.password)
                    .database(db);
                MySqlPoolOptions::new()
                    .min_connections(self.settings.min_connections)
                    .max_connections(self.settings.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect_with(opts)
                    .await
                    .map(DbPool::MySql)
            }
        };
        res.map_err(|source| HarnessError::Connectivity {
            db: db.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    // Accepts TCP connections and never answers the startup handshake.
    async fn silent_server() -> (tokio::net::TcpListener, u16) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn manager(port: u16) -> PoolManager {
        PoolManager::new(
            Dialect::Postgresql,
            ServerSettings {
                host: "127.0.0.1".into(),
                port,
                user: "fixcheck".into(),
                password: String::new(),
                maintenance_db: None,
            },
            PoolSettings {
                min_connections: 1,
                max_connections: 1,
                acquire_timeout_seconds: 30,
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hung_connect_does_not_block_the_registry() {
        let (_listener, port) = silent_server().await;
        let pools = std::sync::Arc::new(manager(port));

        let hung = {
            let pools = pools.clone();
            tokio::spawn(async move { pools.acquire("shop").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        pools.close_pool("crm").await;
        assert!(pools.open_pools().await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!hung.is_finished());
        hung.abort();
    }
}
