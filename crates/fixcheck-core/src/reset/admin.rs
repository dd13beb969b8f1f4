use crate::errors::HarnessError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// An external client invocation (`psql`, `dropdb`, `mysql`...) bounded by a
/// timeout. Secrets go through `env`, which is never rendered.
#[derive(Debug, Clone)]
pub struct AdminCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin_file: Option<PathBuf>,
    pub timeout: Duration,
}

impl AdminCommand {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            stdin_file: None,
            timeout,
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdin_from(mut self, path: PathBuf) -> Self {
        self.stdin_file = Some(path);
        self
    }

    pub fn render(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        if let Some(p) = &self.stdin_file {
            s.push_str(&format!(" < {}", p.display()));
        }
        s
    }

    /// Runs to completion and returns stdout. Non-zero exit is an error
    /// carrying stderr; on timeout the child is killed.
    pub async fn run(&self) -> Result<String, HarnessError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &self.stdin_file {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|e| HarnessError::AdminCommand {
            command: self.render(),
            code: None,
            stderr: format!("failed to spawn: {e}"),
        })?;

        tracing::debug!(event = "admin_command", command = %self.render());
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                return Err(HarnessError::AdminTimeout {
                    command: self.render(),
                    timeout: self.timeout,
                })
            }
            Ok(res) => res?,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(HarnessError::AdminCommand {
                command: self.render(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
