//! Running external executables with a deadline and cancellation
//!
//! The child is spawned with `kill_on_drop`, so abandoning the wait on
//! timeout or cancellation also terminates the process.

use crate::error::{Result, ToolError};
use hippmapper_common::CancelToken;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Default wall-clock limit for a single tool invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct ToolCommand {
    tool: String,
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolCommand {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Shell-like rendering for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    pub async fn run(&self, timeout: Duration, cancel: &CancelToken) -> Result<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled {
                tool: self.tool.clone(),
            });
        }
        debug!("Running: {}", self.command_line());

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| ToolError::Launch {
            tool: self.tool.clone(),
            source,
        })?;

        let start = Instant::now();
        let output = tokio::select! {
            result = child.wait_with_output() => result?,
            _ = tokio::time::sleep(timeout) => {
                return Err(ToolError::Timeout {
                    tool: self.tool.clone(),
                    after: timeout,
                });
            }
            _ = cancel.cancelled() => {
                return Err(ToolError::Cancelled {
                    tool: self.tool.clone(),
                });
            }
        };
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: self.tool.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        debug!("{} finished in {:.2}s", self.tool, duration.as_secs_f64());

        Ok(ToolOutput {
            stdout,
            stderr,
            duration,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = ToolCommand::new("sh", "sh")
            .args(["-c", "echo orient = RAI"])
            .run(Duration::from_secs(10), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "orient = RAI");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let result = ToolCommand::new("sh", "sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run(Duration::from_secs(10), &CancelToken::new())
            .await;
        match result {
            Err(ToolError::Failed { tool, stderr, .. }) => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let start = Instant::now();
        let result = ToolCommand::new("sleep", "sleep")
            .arg("30")
            .run(Duration::from_millis(100), &CancelToken::new())
            .await;
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let result = ToolCommand::new("sleep", "sleep")
            .arg("30")
            .run(Duration::from_secs(20), &cancel)
            .await;
        assert!(matches!(result, Err(ToolError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let result = ToolCommand::new("nope", "/nonexistent/tool/binary")
            .run(Duration::from_secs(1), &CancelToken::new())
            .await;
        assert!(matches!(result, Err(ToolError::Launch { .. })));
    }

    #[test]
    fn test_command_line() {
        let command = ToolCommand::new("c3d", "/opt/c3d").args(["in.nii.gz", "-info"]);
        assert_eq!(command.command_line(), "/opt/c3d in.nii.gz -info");
    }
}
