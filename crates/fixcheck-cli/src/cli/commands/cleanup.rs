use crate::cli::args::CleanupArgs;
use super::{build_pools, build_restorer, config_error, exit_codes, load_harness_config};
use fixcheck_core::coordinator::sweep_orphans;

pub async fn cmd_cleanup(args: CleanupArgs) -> anyhow::Result<i32> {
    let cfg = match load_harness_config(&args.config) {
        Ok(cfg) => cfg,
        Err(msg) => return Ok(config_error(&msg)),
    };
    let pools = build_pools(&cfg);
    let restorer = build_restorer(&cfg, pools.clone())?;

    let res = sweep_orphans(restorer.as_ref()).await;
    pools.close_all_pools().await;
    match res {
        Ok(dropped) if dropped.is_empty() => eprintln!("no leftover clones"),
        Ok(dropped) => {
            for db in &dropped {
                eprintln!("dropped {db}");
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::INFRA);
        }
    }
    Ok(exit_codes::OK)
}
