use crate::cli::args::DoctorArgs;
use super::{config_error, exit_codes, load_harness_config};

pub async fn cmd_doctor(args: DoctorArgs) -> anyhow::Result<i32> {
    let cfg = match load_harness_config(&args.config) {
        Ok(cfg) => cfg,
        Err(msg) => return Ok(config_error(&msg)),
    };
    let report = fixcheck_core::doctor::doctor(&cfg, &args.databases).await;

    let rendered = if args.format == "json" {
        serde_json::to_string_pretty(&report)?
    } else {
        let mut s = String::new();
        s.push_str(&format!("Fixcheck Doctor (v{})\n", report.fixcheck_version));
        s.push_str(&format!(
            "Server: {} {}@{}:{}\n",
            report.dialect.label(),
            report.server.user,
            report.server.host,
            report.server.port
        ));
        s.push_str("\nTools:\n");
        for t in &report.tools {
            match &t.path {
                Some(p) => s.push_str(&format!("✅ {:<10} {}\n", t.name, p)),
                None => s.push_str(&format!("❌ {:<10} not found on PATH\n", t.name)),
            }
        }
        if !report.databases.is_empty() {
            s.push_str("\nDatabases:\n");
            for d in &report.databases {
                match &d.error {
                    None => s.push_str(&format!("✅ {}\n", d.database)),
                    Some(e) => s.push_str(&format!("❌ {}: {}\n", d.database, e)),
                }
            }
        }
        for n in &report.notes {
            s.push_str(&format!("note: {n}\n"));
        }
        s
    };

    if let Some(p) = args.out {
        std::fs::write(&p, rendered)?;
        eprintln!("wrote file: {}", p.display());
    } else if args.format == "json" {
        println!("{}", rendered);
    } else {
        eprintln!("{}", rendered);
    }

    Ok(if report.healthy() {
        exit_codes::OK
    } else {
        exit_codes::INFRA
    })
}
