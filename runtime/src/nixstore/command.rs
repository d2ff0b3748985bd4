//! External tool invocation.
//!
//! The resolvers never spawn processes directly; they go through
//! [`CommandRunner`] so output handling can be tested with canned output.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nixload_core::error::{NixloadError, Result};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` when terminated by a signal)
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stderr followed by stdout.
    ///
    /// Tools print diagnostics on stderr and the result on stdout, so the
    /// result stays last.
    pub fn combined(&self) -> String {
        let mut combined = String::with_capacity(self.stderr.len() + self.stdout.len() + 1);
        combined.push_str(&self.stderr);
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&self.stdout);
        combined
    }

    /// Turn a non-zero exit into a `ToolFailure` carrying the output.
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let message = match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        Err(NixloadError::ToolFailure {
            tool: tool.to_string(),
            message,
            output: self.combined(),
        })
    }
}

/// Runs an external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, killing it if `cancel` fires first.
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner {
    timeout: Option<Duration>,
}

impl TokioCommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let tool = tool_name(program);
        tracing::debug!(command = %format_command(program, args), "Running external tool");

        // kill_on_drop: dropping the wait future on cancel/timeout kills the child
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NixloadError::ToolFailure {
                tool: tool.clone(),
                message: format!("failed to spawn {}: {}", program.display(), e),
                output: String::new(),
            })?;

        let timeout = self.timeout;
        let wait = async move {
            let output = match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                    Ok(output) => output,
                    Err(_) => {
                        return Err(NixloadError::TimeoutError(format!(
                            "{} did not finish within {:?}",
                            program.display(),
                            limit
                        )))
                    }
                },
                None => child.wait_with_output().await,
            };
            output.map_err(NixloadError::from)
        };

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(NixloadError::Cancelled(format!("{} was cancelled", tool)));
            }
            output = wait => output?,
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Extract the result path from tool output.
///
/// Only the last non-blank line counts; earlier lines are diagnostics.
pub fn last_output_line(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
}

/// Short tool name for error messages (`/usr/bin/nix` → `nix`).
pub fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

fn format_command(program: &Path, args: &[String]) -> String {
    let mut s = program.display().to_string();
    for arg in args {
        s.push(' ');
        if arg.contains(char::is_whitespace) {
            s.push('\'');
            s.push_str(arg);
            s.push('\'');
        } else {
            s.push_str(arg);
        }
    }
    s
}
