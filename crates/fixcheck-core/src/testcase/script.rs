use super::{HelperHost, TestCaseExecutor, TestCaseInput, TestCaseReport};
use crate::model::TestCaseStatus;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

pub const PRELUDE: &str = include_str!("prelude.py");

// How long an exiting child gets to finish and flush stderr.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Runs each test case in its own interpreter process. The process is
/// killed when the time budget runs out.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    pub interpreter: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChildMessage {
    Call {
        call: String,
        #[serde(default)]
        args: Value,
    },
    Outcome {
        outcome: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        stdout: String,
    },
}

impl ScriptRunner {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    async fn converse(
        stdin: &mut ChildStdin,
        lines: &mut Lines<BufReader<ChildStdout>>,
        init: &Value,
        host: &mut dyn HelperHost,
    ) -> anyhow::Result<(TestCaseStatus, Option<String>, String)> {
        write_line(stdin, init).await?;
        loop {
            let Some(line) = lines.next_line().await? else {
                anyhow::bail!("test process exited without reporting an outcome");
            };
            let msg: ChildMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(_) => {
                    tracing::debug!(event = "test_case_stray_output", line = %line);
                    continue;
                }
            };
            match msg {
                ChildMessage::Call { call, args } => {
                    let reply = match host.call(&call, &args).await {
                        Ok(value) => json!({ "value": value }),
                        Err(e) => json!({ "error": format!("{e:#}") }),
                    };
                    write_line(stdin, &reply).await?;
                }
                ChildMessage::Outcome {
                    outcome,
                    message,
                    stdout,
                } => return Ok((TestCaseStatus::parse(&outcome), message, stdout)),
            }
        }
    }
}

#[async_trait]
impl TestCaseExecutor for ScriptRunner {
    async fn run_case(
        &self,
        code: &str,
        input: &TestCaseInput,
        host: &mut dyn HelperHost,
    ) -> TestCaseReport {
        let started = Instant::now();
        let spawned = Command::new(&self.interpreter)
            .arg("-c")
            .arg(PRELUDE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                return TestCaseReport::failed(
                    format!("failed to start {}: {e}", self.interpreter),
                    started.elapsed(),
                )
            }
        };

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return TestCaseReport::failed("test process has no stdio", started.elapsed());
        };
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let init = input.init_message(code);
        let res = timeout(
            self.timeout,
            Self::converse(&mut stdin, &mut lines, &init, host),
        )
        .await;

        let mut report = match res {
            Err(_) => {
                let _ = child.start_kill();
                TestCaseReport {
                    status: TestCaseStatus::Timeout,
                    message: Some(format!(
                        "test case exceeded {}s",
                        self.timeout.as_secs_f32()
                    )),
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: started.elapsed(),
                }
            }
            Ok(Ok((status, message, stdout))) => TestCaseReport {
                status,
                message,
                stdout,
                stderr: String::new(),
                duration: started.elapsed(),
            },
            Ok(Err(e)) => {
                drop(stdin);
                let _ = child.start_kill();
                let stderr = stderr_task.await.unwrap_or_default();
                let mut report = TestCaseReport::failed(
                    format!("{e:#}; stderr: {}", stderr.trim()),
                    started.elapsed(),
                );
                report.stderr = stderr;
                return report;
            }
        };

        drop(stdin);
        let _ = timeout(STDERR_GRACE, child.wait()).await;
        if let Ok(Ok(stderr)) = timeout(STDERR_GRACE, stderr_task).await {
            report.stderr = stderr;
        }
        report
    }
}

async fn write_line(stdin: &mut ChildStdin, v: &Value) -> anyhow::Result<()> {
    let mut buf = serde_json::to_vec(v)?;
    buf.push(b'\n');
    stdin.write_all(&buf).await?;
    stdin.flush().await?;
    Ok(())
}
