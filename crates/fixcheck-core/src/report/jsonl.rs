use crate::model::{InstanceOutcome, InstanceRecord, InstanceStatus};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;

/// The input object with the run's result fields merged in.
pub fn output_record(record: &InstanceRecord, outcome: &InstanceOutcome) -> Value {
    let mut obj = match &record.raw {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };
    let status = match outcome.status() {
        InstanceStatus::Success => "success",
        InstanceStatus::Failed => "failed",
    };
    let fields = json!({
        "status": status,
        "error_message": outcome.error_message(),
        "total_test_cases": outcome.total_test_cases,
        "passed_test_cases": outcome.passed_test_cases,
        "failed_test_cases": outcome.failed_test_cases,
        "error_phase_unexpected_pass": outcome.unexpected_pass(),
        "solution_phase_execution_error": outcome.execution_error,
        "solution_phase_timeout_error": outcome.timeout_error,
        "solution_phase_assertion_error": outcome.assertion_error,
        "result_truncated": outcome.truncated,
    });
    if let Value::Object(extra) = fields {
        obj.extend(extra);
    }
    Value::Object(obj)
}

/// Writes one line per record, matched to outcomes by dataset index.
pub fn write_output(
    path: &Path,
    records: &[InstanceRecord],
    outcomes: &[InstanceOutcome],
) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);
    for rec in records {
        let Some(o) = outcomes.iter().find(|o| o.index == rec.index) else {
            tracing::warn!(event = "output_record_missing", index = rec.index);
            continue;
        };
        serde_json::to_writer(&mut w, &output_record(rec, o))?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_echoes_input_and_adds_status() {
        let rec = InstanceRecord::from_value(
            3,
            json!({"instance_id": "q3", "selected_database": "shop", "custom": [1, 2],
                   "test_cases": ["a", "b"]}),
        )
        .unwrap();
        let mut o = InstanceOutcome::new(&rec);
        o.passed_test_cases = 1;
        o.failed_test_cases = vec!["test_2".into()];
        o.assertion_error = true;

        let v = output_record(&rec, &o);
        assert_eq!(v["custom"], json!([1, 2]));
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error_message"], "test_2 failed");
        assert_eq!(v["total_test_cases"], 2);
        assert_eq!(v["solution_phase_assertion_error"], true);
        assert_eq!(v["error_phase_unexpected_pass"], false);
    }

    #[test]
    fn output_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let recs: Vec<_> = (0..3)
            .map(|i| InstanceRecord::from_value(i, json!({"instance_id": i})).unwrap())
            .collect();
        let mut outs: Vec<_> = recs.iter().map(InstanceOutcome::new).collect();
        outs.reverse();

        write_output(&path, &recs, &outs).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["instance_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("\"status\":\"success\""));
    }
}
