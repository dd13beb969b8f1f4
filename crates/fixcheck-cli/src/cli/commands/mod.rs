use super::args::{Cli, Command, ConfigArgs, InitArgs, RunArgs};
use fixcheck_core::config::{load_config, HarnessConfig};
use fixcheck_core::dataset::derived_path;
use fixcheck_core::db::PoolManager;
use fixcheck_core::model::Dialect;
use fixcheck_core::reset::mysql::MySqlDumpRestorer;
use fixcheck_core::reset::postgres::PgTemplateRestorer;
use fixcheck_core::reset::DatabaseRestorer;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod cleanup;
pub mod doctor;
pub mod generate;
pub mod reset;
pub mod run;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const INFRA: i32 = 3;
}

const DEFAULT_CONFIG: &str = "fixcheck.yaml";

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let log_file = match &cli.cmd {
        Command::Run(args) if !args.no_log_file && args.input.is_file() => Some(run_log_path(args)),
        _ => None,
    };
    if let Some(path) = &log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    crate::logging::init(&cli.log, cli.json_logs, log_file.as_deref())?;

    match cli.cmd {
        Command::Run(args) => run::cmd_run(args).await,
        Command::Reset(args) => reset::cmd_reset(args).await,
        Command::Cleanup(args) => cleanup::cmd_cleanup(args).await,
        Command::Doctor(args) => doctor::cmd_doctor(args).await,
        Command::Init(args) => cmd_init(args),
        Command::Generate(args) => generate::cmd_generate(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

pub(crate) fn output_dir(args: &RunArgs) -> PathBuf {
    args.output_dir.clone().unwrap_or_else(|| {
        args.input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

fn run_log_path(args: &RunArgs) -> PathBuf {
    derived_path(&args.input, &output_dir(args), "run.log")
}

/// File, then environment, then `--dialect`. `Err` carries a message for
/// the user; callers exit with `CONFIG_ERROR`.
pub(crate) fn load_harness_config(args: &ConfigArgs) -> Result<HarnessConfig, String> {
    let path = match &args.config {
        Some(p) => Some(p.clone()),
        None => {
            let p = PathBuf::from(DEFAULT_CONFIG);
            p.exists().then_some(p)
        }
    };
    let mut cfg = match &path {
        Some(p) => load_config(p, args.strict_config).map_err(|e| e.0)?,
        None => HarnessConfig::default(),
    };
    cfg.apply_env();
    if let Some(d) = &args.dialect {
        cfg.dialect =
            Dialect::parse(d).ok_or_else(|| format!("unknown dialect '{d}' (postgresql|mysql)"))?;
    }
    tracing::debug!(
        event = "config_loaded",
        file = ?path,
        dialect = %cfg.dialect,
        mode = ?cfg.mode
    );
    Ok(cfg)
}

pub(crate) fn config_error(message: &str) -> i32 {
    eprintln!("config error: {message}");
    exit_codes::CONFIG_ERROR
}

pub(crate) fn build_pools(cfg: &HarnessConfig) -> Arc<PoolManager> {
    Arc::new(PoolManager::new(
        cfg.dialect,
        cfg.server(cfg.dialect).clone(),
        cfg.pool.clone(),
    ))
}

pub(crate) fn build_restorer(
    cfg: &HarnessConfig,
    pools: Arc<PoolManager>,
) -> anyhow::Result<Arc<dyn DatabaseRestorer>> {
    let server = cfg.server(cfg.dialect).clone();
    let restorer: Arc<dyn DatabaseRestorer> = match cfg.dialect {
        Dialect::Postgresql => Arc::new(PgTemplateRestorer::new(
            server,
            pools,
            cfg.limits.admin_timeout(),
        )?),
        Dialect::Mysql => Arc::new(MySqlDumpRestorer::new(
            server,
            cfg.mysql_restore.clone(),
            pools,
            cfg.limits.admin_timeout(),
            cfg.limits.import_timeout(),
        )?),
    };
    Ok(restorer)
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    write_sample_config_if_missing(&args.config)?;
    if args.example {
        write_file_if_missing(Path::new("example.jsonl"), crate::templates::EXAMPLE_DATASET)?;
    }
    if args.gitignore {
        write_file_if_missing(Path::new(".gitignore"), crate::templates::GITIGNORE)?;
    }
    Ok(exit_codes::OK)
}

fn write_sample_config_if_missing(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        eprintln!("note: {} already exists (skipped)", path.display());
        return Ok(());
    }
    fixcheck_core::config::write_sample_config(path)?;
    eprintln!("created {}", path.display());
    Ok(())
}

fn write_file_if_missing(path: &Path, content: &str) -> anyhow::Result<()> {
    if path.exists() {
        eprintln!("note: {} already exists (skipped)", path.display());
        return Ok(());
    }
    std::fs::write(path, content)?;
    eprintln!("created {}", path.display());
    Ok(())
}
