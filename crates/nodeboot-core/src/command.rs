//! External command execution.
//!
//! The reconcilers drive a handful of host tools (`iptables-save`,
//! `getent`, `kubeadm`, `update-alternatives`, ...). They do so through
//! [`CommandRunner`] so tests can script the output.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use nodeboot_common::error::{NodebootError, Result};

/// A single command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Data written to the child's stdin.
    pub stdin: Option<String>,
    /// Kill the child after this long.
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Starts an invocation of `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feeds `input` to the child's stdin.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Bounds the run time.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program and arguments joined by spaces, for logs and fakes.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }
}

/// Runs external commands.
pub trait CommandRunner {
    /// Runs the invocation to completion and captures its output.
    ///
    /// A non-zero exit is reported in [`CommandOutput::status`], not as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or times out.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Runs the invocation and requires a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to run or exits non-zero.
    fn run_checked(&self, invocation: &Invocation) -> Result<String> {
        let output = self.run(invocation)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(NodebootError::Command {
                program: invocation.command_line(),
                message: format!(
                    "exit status {}: {}",
                    output
                        .status
                        .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    output.stderr.trim()
                ),
            })
        }
    }
}

/// [`CommandRunner`] backed by `tokio::process`.
///
/// Each call drives the child on its own current-thread runtime, so callers
/// stay synchronous. A child that outlives its timeout is killed on drop.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!(cmd = %invocation.command_line(), "running command");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NodebootError::Command {
                program: invocation.program.clone(),
                message: format!("failed to start runtime: {e}"),
            })?;
        runtime.block_on(run_child(invocation))
    }
}

async fn run_child(invocation: &Invocation) -> Result<CommandOutput> {
    let spawn_err = |e: std::io::Error| NodebootError::Command {
        program: invocation.program.clone(),
        message: e.to_string(),
    };

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_err)?;

    let pipe = child.stdin.take();
    let input = invocation.stdin.clone().unwrap_or_default();
    let feed = async move {
        if let Some(mut pipe) = pipe {
            // A child that exits without reading stdin closes the pipe early.
            let _ = pipe.write_all(input.as_bytes()).await;
        }
    };
    let finished = async move {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = match invocation.timeout {
        None => finished.await,
        Some(limit) => tokio::time::timeout(limit, finished)
            .await
            .map_err(|_| NodebootError::Command {
                program: invocation.command_line(),
                message: format!("timed out after {}s", limit.as_secs()),
            })?,
    }
    .map_err(spawn_err)?;

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_args() {
        let inv = Invocation::new("getent").args(["ahostsv4", "host.docker.internal"]);
        assert_eq!(inv.command_line(), "getent ahostsv4 host.docker.internal");
    }

    #[test]
    fn system_runner_captures_stdout() {
        let out = SystemRunner
            .run(&Invocation::new("sh").args(["-c", "echo hello"]))
            .expect("run sh");
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn system_runner_feeds_stdin() {
        let out = SystemRunner
            .run(&Invocation::new("cat").stdin("-A OUTPUT\n"))
            .expect("run cat");
        assert_eq!(out.stdout, "-A OUTPUT\n");
    }

    #[test]
    fn system_runner_enforces_timeout() {
        let err = SystemRunner
            .run(
                &Invocation::new("sleep")
                    .args(["5"])
                    .timeout(Duration::from_millis(100)),
            )
            .expect_err("should time out");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn timed_out_child_is_killed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("late");
        let script = format!("sleep 1; touch {}", marker.display());
        let err = SystemRunner
            .run(
                &Invocation::new("sh")
                    .args(["-c", script.as_str()])
                    .timeout(Duration::from_millis(100)),
            )
            .expect_err("should time out");
        assert!(err.to_string().contains("timed out after 0s"));
        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "child kept running after the timeout");
    }

    #[test]
    fn large_stdin_does_not_block_output() {
        let input = "-A OUTPUT -j ACCEPT\n".repeat(20_000);
        let out = SystemRunner
            .run(
                &Invocation::new("cat")
                    .stdin(input.clone())
                    .timeout(Duration::from_secs(5)),
            )
            .expect("run cat");
        assert_eq!(out.stdout.len(), input.len());
    }

    #[test]
    fn run_checked_rejects_nonzero_exit() {
        let err = SystemRunner
            .run_checked(&Invocation::new("sh").args(["-c", "exit 3"]))
            .expect_err("non-zero");
        assert!(err.to_string().contains("exit status 3"));
    }

    #[test]
    fn missing_program_is_an_error() {
        assert!(
            SystemRunner
                .run(&Invocation::new("/nonexistent/definitely-not-here"))
                .is_err()
        );
    }
}
