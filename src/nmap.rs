//! External scanning utility invocation
//!
//! Every stage talks to nmap through [`ToolRunner`], which hides process
//! spawning and the wall-clock budget, and interprets stdout through an
//! [`OutputParser`]. Both seams exist so the tool (or its output grammar)
//! can be replaced in tests and in deployments without touching the stages.

use async_trait::async_trait;
use std::{
    path::PathBuf,
    process::Stdio,
    time::Duration,
};
use tokio::{process::Command, time::timeout};

use crate::error::{Result, ScannerError};

/// Default wall-clock budget for one invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Captured result of a finished invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Exited(ToolOutput),
    TimedOut { limit: Duration },
}

impl ToolOutcome {
    /// Successful exit with the given stdout
    pub fn completed<S: Into<String>>(stdout: S) -> Self {
        Self::Exited(ToolOutput {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        })
    }

    /// Non-zero exit with the given stderr
    pub fn failed<S: Into<String>>(status: i32, stderr: S) -> Self {
        Self::Exited(ToolOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        })
    }
}

/// Runs the external scanning utility with a fixed argument list
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion or until the time budget expires.
    ///
    /// Returns `Err` only when the process cannot be started or awaited;
    /// non-zero exits and timeouts are outcomes, not errors.
    async fn run(&self, args: &[String]) -> Result<ToolOutcome>;

    /// Program name used in log lines and errors
    fn program(&self) -> String;
}

/// Interprets the tool's stdout for one stage
pub trait OutputParser: Send + Sync {
    type Output;

    fn parse(&self, stdout: &str) -> Self::Output;
}

/// Subprocess-backed runner for the nmap binary
#[derive(Debug, Clone)]
pub struct NmapRunner {
    program: PathBuf,
    timeout: Duration,
}

impl NmapRunner {
    pub fn new<P: Into<PathBuf>>(program: P, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Default for NmapRunner {
    fn default() -> Self {
        Self::new("nmap", DEFAULT_TOOL_TIMEOUT)
    }
}

#[async_trait]
impl ToolRunner for NmapRunner {
    async fn run(&self, args: &[String]) -> Result<ToolOutcome> {
        tracing::trace!(program = %self.program.display(), args = ?args, "Spawning scanner");

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScannerError::tool(self.program(), format!("Failed to spawn: {}", e)))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => Ok(ToolOutcome::TimedOut {
                limit: self.timeout,
            }),
            Ok(Err(e)) => Err(ScannerError::tool(
                self.program(),
                format!("Failed to collect output: {}", e),
            )),
            Ok(Ok(output)) => Ok(ToolOutcome::Exited(ToolOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })),
        }
    }

    fn program(&self) -> String {
        self.program.display().to_string()
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let runner = NmapRunner::new("sh", Duration::from_secs(5));
        let args = vec!["-c".to_string(), "echo 'Nmap done'; exit 3".to_string()];

        match runner.run(&args).await.unwrap() {
            ToolOutcome::Exited(output) => {
                assert_eq!(output.status, Some(3));
                assert!(!output.success());
                assert_eq!(output.stdout.trim(), "Nmap done");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_an_outcome() {
        let runner = NmapRunner::new("sleep", Duration::from_millis(100));
        let outcome = runner.run(&["5".to_string()]).await.unwrap();
        assert_eq!(
            outcome,
            ToolOutcome::TimedOut {
                limit: Duration::from_millis(100)
            }
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_tool_error() {
        let runner = NmapRunner::new("/nonexistent/nmap-binary", Duration::from_secs(1));
        let err = runner.run(&[]).await.unwrap_err();
        assert!(matches!(err, ScannerError::Tool { .. }));
    }
}
