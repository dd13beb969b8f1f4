use crate::config::HarnessConfig;
use crate::db::PoolManager;
use crate::model::Dialect;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub schema_version: u32,
    pub generated_at: String,
    pub fixcheck_version: String,
    pub platform: PlatformInfo,
    pub dialect: Dialect,
    pub server: ServerSummary,
    pub tools: Vec<ToolCheck>,
    pub databases: Vec<DatabaseCheck>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSummary {
    pub host: String,
    pub port: u16,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCheck {
    pub name: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCheck {
    pub database: String,
    pub reachable: bool,
    pub error: Option<String>,
}

impl DoctorReport {
    pub fn healthy(&self) -> bool {
        self.tools.iter().all(|t| t.path.is_some()) && self.databases.iter().all(|d| d.reachable)
    }
}

/// Client binaries the reset path shells out to.
pub fn required_tools(dialect: Dialect) -> &'static [&'static str] {
    match dialect {
        Dialect::Postgresql => &["psql", "dropdb", "createdb"],
        Dialect::Mysql => &["mysql"],
    }
}

pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

pub async fn doctor(cfg: &HarnessConfig, databases: &[String]) -> DoctorReport {
    let mut notes = Vec::new();
    let server = cfg.server(cfg.dialect);

    let mut names: Vec<&str> = required_tools(cfg.dialect).to_vec();
    names.push(cfg.test_cases.interpreter.as_str());
    let tools = names
        .into_iter()
        .map(|name| ToolCheck {
            name: name.to_string(),
            path: find_on_path(name).map(|p| p.display().to_string()),
        })
        .collect();

    if cfg.dialect == Dialect::Mysql && cfg.mysql_restore.dump_dir.is_none() {
        notes.push("mysql_restore.dump_dir is not set; resets will fail".to_string());
    }

    let pools = PoolManager::new(cfg.dialect, server.clone(), cfg.pool.clone());
    let mut checks = Vec::new();
    for db in databases {
        let check = match pools.acquire(db).await {
            Ok(conn) => {
                pools.release(conn);
                DatabaseCheck {
                    database: db.clone(),
                    reachable: true,
                    error: None,
                }
            }
            Err(e) => DatabaseCheck {
                database: db.clone(),
                reachable: false,
                error: Some(e.to_string()),
            },
        };
        checks.push(check);
    }
    pools.close_all_pools().await;
    if databases.is_empty() {
        notes.push("no databases given; connectivity not checked".to_string());
    }

    DoctorReport {
        schema_version: 1,
        generated_at: Utc::now().to_rfc3339(),
        fixcheck_version: env!("CARGO_PKG_VERSION").to_string(),
        platform: PlatformInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        },
        dialect: cfg.dialect,
        server: ServerSummary {
            host: server.host.clone(),
            port: server.port,
            user: server.user.clone(),
        },
        tools,
        databases: checks,
        notes,
    }
}
