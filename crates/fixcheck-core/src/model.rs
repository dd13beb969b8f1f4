use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const SPLIT_MARKER: &str = "[split]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "postgres", alias = "pg")]
    Postgresql,
    Mysql,
}

impl Dialect {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Some(Dialect::Postgresql),
            "mysql" => Some(Dialect::Mysql),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dialect::Postgresql => "PostgreSQL",
            Dialect::Mysql => "MySQL",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgresql => write!(f, "postgresql"),
            Dialect::Mysql => write!(f, "mysql"),
        }
    }
}

/// Which statements play the role of the fix in the solution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    /// Evaluate the reference `sol_sql` (sanity check of the benchmark itself).
    Gold,
    /// Evaluate the generated `pred_sqls`.
    Pred,
}

impl EvalMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gold" => Some(EvalMode::Gold),
            "pred" => Some(EvalMode::Pred),
            _ => None,
        }
    }
}

/// Ordered list of SQL statements. Accepts a JSON list, a single string with
/// `[split]` separators, or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SqlBatch(pub Vec<String>);

impl SqlBatch {
    pub fn statements(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<String>> for SqlBatch {
    fn from(v: Vec<String>) -> Self {
        SqlBatch(v)
    }
}

pub fn split_field(raw: &str) -> Vec<String> {
    raw.split(SPLIT_MARKER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl<'de> Deserialize<'de> for SqlBatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<Option<String>>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => SqlBatch::default(),
            Some(Raw::One(s)) => SqlBatch(split_field(&s)),
            Some(Raw::Many(v)) => SqlBatch(
                v.iter()
                    .flatten()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        })
    }
}

/// Instance ids come as strings or integers depending on the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Ok(InstanceId(match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }))
    }
}

/// Null reads as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A list of strings where the list itself or any entry may be null.
fn nullable_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let items: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(items.into_iter().flatten().flatten().collect())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BenchmarkInstance {
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default, alias = "db_id")]
    pub selected_database: Option<String>,
    #[serde(default)]
    pub preprocess_sql: Option<SqlBatch>,
    #[serde(default)]
    pub error_sql: Option<SqlBatch>,
    #[serde(default)]
    pub sol_sql: Option<SqlBatch>,
    #[serde(default)]
    pub pred_sqls: SqlBatch,
    #[serde(default)]
    pub clean_up_sql: SqlBatch,
    #[serde(default, deserialize_with = "nullable_strings")]
    pub test_cases: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub efficiency: bool,
    #[serde(default, alias = "language")]
    pub dialect: Option<Dialect>,
    #[serde(default)]
    pub category: Option<String>,
}

impl BenchmarkInstance {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.selected_database.as_deref().map_or(true, str::is_empty) {
            missing.push("selected_database");
        }
        if self.preprocess_sql.is_none() {
            missing.push("preprocess_sql");
        }
        if self.error_sql.is_none() {
            missing.push("error_sql");
        }
        if self.sol_sql.is_none() {
            missing.push("sol_sql");
        }
        missing
    }

    pub fn preprocess(&self) -> &[String] {
        self.preprocess_sql.as_ref().map_or(&[], |b| b.statements())
    }

    pub fn error_statements(&self) -> &[String] {
        self.error_sql.as_ref().map_or(&[], |b| b.statements())
    }

    pub fn reference_statements(&self) -> &[String] {
        self.sol_sql.as_ref().map_or(&[], |b| b.statements())
    }

    pub fn candidate_statements(&self, mode: EvalMode) -> &[String] {
        match mode {
            EvalMode::Gold => self.reference_statements(),
            EvalMode::Pred => self.pred_sqls.statements(),
        }
    }
}

/// One dataset line: the parsed instance plus the raw object, so output
/// records can echo every input field.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub index: usize,
    pub raw: serde_json::Value,
    pub instance: BenchmarkInstance,
    /// Set when the line is valid JSON but not a valid instance. The record
    /// is still reported, as a failed instance.
    pub decode_error: Option<String>,
}

impl InstanceRecord {
    pub fn from_value(index: usize, raw: serde_json::Value) -> serde_json::Result<Self> {
        let instance = serde_json::from_value(raw.clone())?;
        Ok(Self {
            index,
            raw,
            instance,
            decode_error: None,
        })
    }

    /// Like [`InstanceRecord::from_value`], but a record that does not decode
    /// is kept with its id and the decode error.
    pub fn from_value_lenient(index: usize, raw: serde_json::Value) -> Self {
        match serde_json::from_value::<BenchmarkInstance>(raw.clone()) {
            Ok(instance) => Self {
                index,
                raw,
                instance,
                decode_error: None,
            },
            Err(e) => {
                let instance = BenchmarkInstance {
                    instance_id: raw
                        .get("instance_id")
                        .cloned()
                        .and_then(|v| serde_json::from_value(v).ok()),
                    category: raw.get("category").and_then(|v| v.as_str()).map(str::to_string),
                    ..BenchmarkInstance::default()
                };
                Self {
                    index,
                    raw,
                    instance,
                    decode_error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn id(&self) -> String {
        self.instance
            .instance_id
            .as_ref()
            .map(|i| i.0.clone())
            .unwrap_or_else(|| self.index.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseStatus {
    Passed,
    Failed,
    Timeout,
}

impl TestCaseStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "passed" | "pass" => TestCaseStatus::Passed,
            "timeout" => TestCaseStatus::Timeout,
            _ => TestCaseStatus::Failed,
        }
    }
}

pub fn test_case_id(index: usize) -> String {
    format!("test_{}", index + 1)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ErrorPhaseOutcome {
    NotRun,
    /// The error SQL raised, which is the reported bug.
    Reproduced { message: String },
    /// The error SQL ran but at least one test case failed against its result.
    FailedAsExpected { failed_tests: Vec<String> },
    /// Every test case passed against the buggy SQL.
    UnexpectedPass,
    /// Nothing to compare against (no test cases, or an efficiency instance).
    Inconclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Success,
    Failed,
}

pub const UNEXPECTED_PASS_MESSAGE: &str =
    "Error Phase: Error SQL did not raise an error, and test cases unexpectedly passed.";

#[derive(Debug, Clone, Serialize)]
pub struct InstanceOutcome {
    pub index: usize,
    pub instance_id: String,
    pub database: Option<String>,
    pub category: Option<String>,
    pub error_phase: ErrorPhaseOutcome,
    pub execution_error: bool,
    pub timeout_error: bool,
    pub assertion_error: bool,
    pub total_test_cases: usize,
    pub passed_test_cases: usize,
    pub failed_test_cases: Vec<String>,
    pub truncated: bool,
    pub missing_fields: Vec<String>,
    pub solution_error: Option<String>,
    pub infra_error: Option<String>,
}

impl InstanceOutcome {
    pub fn new(record: &InstanceRecord) -> Self {
        Self {
            index: record.index,
            instance_id: record.id(),
            database: record.instance.selected_database.clone(),
            category: record.instance.category.clone(),
            error_phase: ErrorPhaseOutcome::NotRun,
            execution_error: false,
            timeout_error: false,
            assertion_error: false,
            total_test_cases: record.instance.test_cases.len(),
            passed_test_cases: 0,
            failed_test_cases: Vec::new(),
            truncated: false,
            missing_fields: Vec::new(),
            solution_error: None,
            infra_error: None,
        }
    }

    /// An instance-level infrastructure failure counts as an execution error.
    /// The first recorded failure is kept.
    pub fn with_infra_error(mut self, message: impl Into<String>) -> Self {
        self.execution_error = true;
        self.infra_error.get_or_insert_with(|| message.into());
        self
    }

    pub fn unexpected_pass(&self) -> bool {
        self.error_phase == ErrorPhaseOutcome::UnexpectedPass
    }

    pub fn passed(&self) -> bool {
        self.missing_fields.is_empty()
            && !self.execution_error
            && !self.timeout_error
            && !self.assertion_error
            && !self.unexpected_pass()
    }

    pub fn status(&self) -> InstanceStatus {
        if self.passed() {
            InstanceStatus::Success
        } else {
            InstanceStatus::Failed
        }
    }

    pub fn error_message(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        if !self.missing_fields.is_empty() {
            return Some(format!("Missing fields: {}", self.missing_fields.join(", ")));
        }
        if self.unexpected_pass() {
            return Some(UNEXPECTED_PASS_MESSAGE.to_string());
        }
        if let Some(e) = &self.infra_error {
            return Some(e.clone());
        }
        if !self.failed_test_cases.is_empty() {
            return Some(format!("{} failed", self.failed_test_cases.join(", ")));
        }
        let note = if self.timeout_error {
            "Sol Phase: Timeout Error"
        } else if self.execution_error {
            "Sol Phase: Execution Error"
        } else {
            "Sol Phase: Assertion Error"
        };
        Some(match &self.solution_error {
            Some(detail) => format!("{note}: {detail}"),
            None => note.to_string(),
        })
    }
}
