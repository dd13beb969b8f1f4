use crate::cli::args::ResetArgs;
use super::{build_pools, build_restorer, config_error, exit_codes, load_harness_config};

pub async fn cmd_reset(args: ResetArgs) -> anyhow::Result<i32> {
    let cfg = match load_harness_config(&args.config) {
        Ok(cfg) => cfg,
        Err(msg) => return Ok(config_error(&msg)),
    };
    let pools = build_pools(&cfg);
    let restorer = build_restorer(&cfg, pools.clone())?;

    let mut failed = 0;
    for db in &args.databases {
        match restorer.reset(db).await {
            Ok(()) => eprintln!("✅ {db} restored"),
            Err(e) => {
                failed += 1;
                eprintln!("💥 {db}: {e}");
            }
        }
    }
    pools.close_all_pools().await;

    Ok(if failed == 0 {
        exit_codes::OK
    } else {
        exit_codes::INFRA
    })
}
