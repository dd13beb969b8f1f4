use crate::model::InstanceRecord;
use anyhow::Context;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::path::Path;

/// Reads a JSONL dataset. Blank lines are skipped; `limit` keeps the first N
/// records. A line that is not JSON fails the load, while a JSON object that
/// is not a valid instance is kept and later reported as a failed instance.
pub fn load_dataset(path: &Path, limit: Option<usize>) -> anyhow::Result<Vec<InstanceRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        if limit.is_some_and(|n| records.len() >= n) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), line_no + 1))?;
        let rec = InstanceRecord::from_value_lenient(records.len(), raw);
        if let Some(e) = &rec.decode_error {
            tracing::warn!(
                event = "instance_invalid",
                line = line_no + 1,
                instance_id = %rec.id(),
                error = %e
            );
        }
        records.push(rec);
    }
    tracing::info!(event = "dataset_loaded", path = %path.display(), records = records.len());
    Ok(records)
}

pub fn write_jsonl(path: &Path, rows: &[Value]) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = std::io::BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut w, row)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

/// `<dir>/<stem>_<suffix>` where `stem` is the input file name without extension.
pub fn derived_path(input: &Path, dir: &Path, suffix: &str) -> std::path::PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run".to_string());
    dir.join(format!("{stem}_{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_with_limit_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("data.jsonl");
        std::fs::write(
            &p,
            "{\"instance_id\": 1, \"selected_database\": \"a\"}\n\n{\"instance_id\": 2}\n{\"instance_id\": 3}\n",
        )
        .unwrap();

        let all = load_dataset(&p, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].index, 1);
        assert_eq!(all[1].id(), "2");

        let two = load_dataset(&p, Some(2)).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn bad_line_reports_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.jsonl");
        std::fs::write(&p, "{\"instance_id\": 1}\n{oops\n").unwrap();
        let err = format!("{:#}", load_dataset(&p, None).unwrap_err());
        assert!(err.contains("bad.jsonl:2"), "{err}");
    }

    #[test]
    fn nulls_and_bad_records_do_not_abort_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nulls.jsonl");
        std::fs::write(
            &p,
            concat!(
                "{\"instance_id\": \"a\", \"efficiency\": null, \"test_cases\": [\"t1\", null], \"pred_sqls\": [\"SELECT 1\", null]}\n",
                "{\"instance_id\": \"b\", \"selected_database\": 5}\n",
                "{\"instance_id\": \"c\", \"test_cases\": null}\n",
            ),
        )
        .unwrap();

        let recs = load_dataset(&p, None).unwrap();
        assert_eq!(recs.len(), 3);

        let a = &recs[0];
        assert!(a.decode_error.is_none());
        assert!(!a.instance.efficiency);
        assert_eq!(a.instance.test_cases, vec!["t1"]);
        assert_eq!(a.instance.pred_sqls.statements(), ["SELECT 1"]);

        let b = &recs[1];
        assert_eq!(b.id(), "b");
        assert!(b.decode_error.is_some());

        assert!(recs[2].instance.test_cases.is_empty());
        assert!(recs[2].decode_error.is_none());
    }

    #[test]
    fn derived_paths_use_the_input_stem() {
        let p = derived_path(Path::new("/data/pg_eval.jsonl"), Path::new("/out"), "report.txt");
        assert_eq!(p, Path::new("/out/pg_eval_report.txt"));
    }
}
