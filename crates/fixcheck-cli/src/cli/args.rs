use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fixcheck",
    version,
    about = "Two-phase evaluation of SQL fixes against live PostgreSQL and MySQL databases"
)]
pub struct Cli {
    /// Log filter in EnvFilter syntax
    #[arg(long, global = true, env = "FIXCHECK_LOG", default_value = "info")]
    pub log: String,

    /// Emit stderr logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate a JSONL dataset
    Run(RunArgs),
    /// Restore databases from their templates
    Reset(ResetArgs),
    /// Drop leftover `_process_` clones
    Cleanup(CleanupArgs),
    /// Check client tools and database connectivity
    Doctor(DoctorArgs),
    /// Write a sample config (and optionally an example dataset)
    Init(InitArgs),
    /// Fill `responses` for records carrying a `prompt`
    Generate(GenerateArgs),
    Version,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Config file; ./fixcheck.yaml is used when present
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Unknown config keys are errors instead of warnings
    #[arg(long)]
    pub strict_config: bool,

    /// postgresql | mysql (overrides the config file)
    #[arg(long)]
    pub dialect: Option<String>,
}

#[derive(Parser, Clone, Debug)]
pub struct RunArgs {
    #[arg(long)]
    pub input: PathBuf,

    /// Defaults to the input file's directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// gold (evaluate sol_sql) | pred (evaluate pred_sqls)
    #[arg(long)]
    pub mode: Option<String>,

    #[arg(long)]
    pub workers: Option<usize>,

    /// Only evaluate the first N records
    #[arg(long)]
    pub limit: Option<usize>,

    /// Run on the logical databases with a single worker
    #[arg(long)]
    pub no_clones: bool,

    /// Exit 1 when any instance fails
    #[arg(long)]
    pub strict: bool,

    /// Do not write `<stem>_run.log`
    #[arg(long)]
    pub no_log_file: bool,
}

#[derive(Parser, Clone, Debug)]
pub struct ResetArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long = "db", required = true)]
    pub databases: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Parser, Clone, Debug)]
pub struct DoctorArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Databases to test connectivity against
    #[arg(long = "db")]
    pub databases: Vec<String>,

    /// text | json
    #[arg(long, default_value = "text")]
    pub format: String,

    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
pub struct InitArgs {
    #[arg(long, default_value = "fixcheck.yaml")]
    pub config: PathBuf,

    /// Also write example.jsonl
    #[arg(long)]
    pub example: bool,

    #[arg(long)]
    pub gitignore: bool,
}

#[derive(Parser, Clone, Debug)]
pub struct GenerateArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// openai | fake
    #[arg(long, default_value = "openai")]
    pub provider: String,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub samples: u32,

    #[arg(long, default_value_t = 0.0)]
    pub temperature: f32,

    /// Canned response for the fake provider (repeatable)
    #[arg(long = "fake-response")]
    pub fake_responses: Vec<String>,

    #[arg(long)]
    pub limit: Option<usize>,
}
