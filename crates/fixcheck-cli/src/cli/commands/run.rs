use crate::cli::args::RunArgs;
use super::{build_pools, build_restorer, config_error, exit_codes, load_harness_config, output_dir};
use fixcheck_core::coordinator::EphemeralCoordinator;
use fixcheck_core::dataset::{derived_path, load_dataset};
use fixcheck_core::engine::{LiveBackend, RunPolicy, Runner};
use fixcheck_core::executor::{ExecLimits, QueryExecutor};
use fixcheck_core::model::{EvalMode, InstanceRecord};
use fixcheck_core::report::console::print_summary;
use fixcheck_core::report::jsonl::write_output;
use fixcheck_core::report::text::write_report;
use fixcheck_core::testcase::script::ScriptRunner;
use std::collections::BTreeSet;
use std::sync::Arc;

pub async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let mut cfg = match load_harness_config(&args.config) {
        Ok(cfg) => cfg,
        Err(msg) => return Ok(config_error(&msg)),
    };
    if let Some(m) = &args.mode {
        match EvalMode::parse(m) {
            Some(mode) => cfg.mode = mode,
            None => return Ok(config_error(&format!("unknown mode '{m}' (gold|pred)"))),
        }
    }
    if let Some(w) = args.workers {
        cfg.runner.workers = w;
    }
    if args.no_clones {
        cfg.runner.ephemeral_clones = false;
    }
    if !args.input.is_file() {
        return Ok(config_error(&format!(
            "input file not found: {}",
            args.input.display()
        )));
    }

    let records = load_dataset(&args.input, args.limit)?;
    let out_dir = output_dir(&args);
    std::fs::create_dir_all(&out_dir)?;
    tracing::info!(
        event = "run_configured",
        records = records.len(),
        workers = cfg.runner.workers,
        clones = cfg.runner.ephemeral_clones,
        dialect = %cfg.dialect,
        mode = ?cfg.mode
    );

    let pools = build_pools(&cfg);
    let restorer = build_restorer(&cfg, pools.clone())?;
    let executor = Arc::new(QueryExecutor::new(
        cfg.dialect,
        ExecLimits {
            statement_timeout: cfg.limits.statement_timeout(),
            max_rows: cfg.limits.max_rows,
        },
    ));
    let tests = Arc::new(ScriptRunner::new(
        cfg.test_cases.interpreter.clone(),
        cfg.limits.test_case_timeout(),
    ));
    let backend = Arc::new(LiveBackend {
        pools: pools.clone(),
        executor,
        restorer: restorer.clone(),
        tests,
        helpers: fixcheck_helpers::default_registry(),
    });

    let bases = runnable_bases(&records);
    let coordinator = if cfg.runner.ephemeral_clones && !bases.is_empty() {
        let copies = cfg.runner.workers.max(1);
        match EphemeralCoordinator::provision(restorer.as_ref(), &bases, copies).await {
            Ok(c) => Some(Arc::new(c)),
            Err(e) => {
                eprintln!("error: could not provision clones: {e}");
                pools.close_all_pools().await;
                return Ok(exit_codes::INFRA);
            }
        }
    } else {
        None
    };

    let runner = Runner {
        backend,
        coordinator: coordinator.clone(),
        policy: RunPolicy {
            dialect: cfg.dialect,
            mode: cfg.mode,
            workers: cfg.runner.workers,
            borrow_timeout: cfg.limits.clone_borrow_timeout(),
            efficiency_binding: cfg.runner.efficiency_binding,
        },
    };

    let result = tokio::select! {
        r = runner.run_suite(records) => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };

    if let Some(c) = &coordinator {
        c.teardown(restorer.as_ref()).await;
    }
    pools.close_all_pools().await;

    let run = match result {
        Some(Ok(run)) => run,
        Some(Err(e)) => {
            eprintln!("fatal: {e:#}");
            return Ok(exit_codes::INFRA);
        }
        None => {
            eprintln!("interrupted; clones dropped, no outputs written");
            return Ok(exit_codes::INFRA);
        }
    };

    let output_path = derived_path(&args.input, &out_dir, "output_with_status.jsonl");
    let report_path = derived_path(&args.input, &out_dir, "report.txt");
    let timestamp = chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string();
    write_output(&output_path, &run.records, &run.outcomes)?;
    write_report(&report_path, &run, &timestamp)?;

    print_summary(&run, false);
    eprintln!("output: {}", output_path.display());
    eprintln!("report: {}", report_path.display());

    if args.strict && run.report.passed < run.report.total {
        return Ok(exit_codes::TEST_FAILED);
    }
    Ok(exit_codes::OK)
}

/// Logical databases of the records that will actually reach a database.
fn runnable_bases(records: &[InstanceRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.instance.missing_fields().is_empty())
        .filter_map(|r| r.instance.selected_database.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
