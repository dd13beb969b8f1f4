use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn fixcheck(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fixcheck").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("FIXCHECK_LOG")
        .env_remove("OPENAI_API_KEY");
    cmd
}

// Records without error_sql/sol_sql never reach a database.
const INCOMPLETE_DATASET: &str = r#"{"instance_id": "q1", "selected_database": "shop", "category": "Query", "test_cases": []}
{"instance_id": "q2", "category": "Management", "error_sql": ["SELECT 1"]}
"#;

#[test]
fn version_prints_package_version() {
    let dir = TempDir::new().unwrap();
    fixcheck(&dir)
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn init_writes_config_once() {
    let dir = TempDir::new().unwrap();
    fixcheck(&dir)
        .args(["init", "--example", "--gitignore"])
        .assert()
        .success()
        .stderr(contains("created fixcheck.yaml"));
    assert!(dir.path().join("example.jsonl").exists());
    assert!(fs::read_to_string(dir.path().join(".gitignore"))
        .unwrap()
        .contains("_report.txt"));

    fixcheck(&dir)
        .arg("init")
        .assert()
        .success()
        .stderr(contains("already exists"));
}

#[test]
fn generated_config_loads() {
    let dir = TempDir::new().unwrap();
    fixcheck(&dir).arg("init").assert().success();
    fs::write(dir.path().join("data.jsonl"), INCOMPLETE_DATASET).unwrap();

    fixcheck(&dir)
        .args(["run", "--input", "data.jsonl", "--strict-config", "--no-log-file"])
        .assert()
        .success();
}

#[test]
fn run_with_missing_input_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    fixcheck(&dir)
        .args(["run", "--input", "nope.jsonl"])
        .assert()
        .code(2)
        .stderr(contains("input file not found"));
}

#[test]
fn unknown_dialect_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("data.jsonl"), INCOMPLETE_DATASET).unwrap();
    fixcheck(&dir)
        .args(["run", "--input", "data.jsonl", "--dialect", "oracle"])
        .assert()
        .code(2)
        .stderr(contains("unknown dialect"));
}

#[test]
fn unknown_config_key_fails_in_strict_mode() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("fixcheck.yaml"), "version: 1\nworkerz: 3\n").unwrap();
    fs::write(dir.path().join("data.jsonl"), INCOMPLETE_DATASET).unwrap();
    fixcheck(&dir)
        .args(["run", "--input", "data.jsonl", "--strict-config"])
        .assert()
        .code(2)
        .stderr(contains("workerz"));
}

#[test]
fn incomplete_records_are_reported_without_a_database() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("data.jsonl"), INCOMPLETE_DATASET).unwrap();

    fixcheck(&dir)
        .args(["run", "--input", "data.jsonl", "--output-dir", "out", "--no-clones"])
        .assert()
        .success()
        .stderr(contains("Summary:"));

    let out = dir.path().join("out");
    let report = fs::read_to_string(out.join("data_report.txt")).unwrap();
    assert!(report.contains("Fixcheck Result Statistics (PostgreSQL):"));
    assert!(report.contains("Number of Instances: 2"));
    assert!(report.contains("Number of Error SQL Errors: 2"));
    assert!(report.contains("Overall Accuracy: 0.00%"));

    let ts = regex::Regex::new(r"Timestamp: \d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{6}").unwrap();
    assert!(ts.is_match(&report), "timestamp missing:\n{report}");

    let lines: Vec<serde_json::Value> = fs::read_to_string(out.join("data_output_with_status.jsonl"))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["instance_id"], "q1");
    assert_eq!(lines[0]["status"], "failed");
    assert!(lines[0]["error_message"]
        .as_str()
        .unwrap()
        .contains("error_sql"));
    assert_eq!(lines[1]["category"], "Management");

    assert!(out.join("data_run.log").exists());
}

#[test]
fn strict_run_fails_when_an_instance_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("data.jsonl"), INCOMPLETE_DATASET).unwrap();
    fixcheck(&dir)
        .args(["run", "--input", "data.jsonl", "--no-clones", "--strict", "--no-log-file"])
        .assert()
        .code(1);
    assert!(!dir.path().join("data_run.log").exists());
}

#[test]
fn generate_with_fake_provider_fills_responses() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("prompts.jsonl"),
        "{\"instance_id\": \"a\", \"prompt\": \"fix this query\"}\n{\"instance_id\": \"b\"}\n",
    )
    .unwrap();

    fixcheck(&dir)
        .args([
            "generate",
            "--input",
            "prompts.jsonl",
            "--output",
            "gen/out.jsonl",
            "--provider",
            "fake",
            "--fake-response",
            "SELECT 1",
            "--samples",
            "2",
        ])
        .assert()
        .success()
        .stderr(contains("generated 1 of 2 records"));

    let text = fs::read_to_string(dir.path().join("gen/out.jsonl")).unwrap();
    let rows: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows[0]["responses"], serde_json::json!(["SELECT 1", "SELECT 1"]));
    assert_eq!(rows[0]["usage"]["completion_tokens"], 4);
    assert!(rows[1].get("responses").is_none());
}

#[test]
fn generate_without_api_key_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("p.jsonl"), "{\"prompt\": \"x\"}\n").unwrap();
    fixcheck(&dir)
        .args(["generate", "--input", "p.jsonl", "--output", "o.jsonl"])
        .assert()
        .code(2)
        .stderr(contains("OPENAI_API_KEY"));
}

#[test]
fn doctor_emits_json_report() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("doctor.json");
    fixcheck(&dir)
        .args(["doctor", "--format", "json", "--out"])
        .arg(&out)
        .assert()
        .stderr(contains("wrote file"));

    let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(v["schema_version"], 1);
    assert_eq!(v["dialect"], "postgresql");
    assert!(v["notes"][0]
        .as_str()
        .unwrap()
        .contains("connectivity not checked"));
}
