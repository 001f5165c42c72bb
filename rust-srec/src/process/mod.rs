//! External Process Harness (C8): uniform spawn/wait/kill of extractor and
//! muxer child processes with hidden console windows, line-oriented UTF-8
//! output capture, and cooperative cancellation.

use std::process::Stdio;
use std::time::Duration;

use process_utils::tokio_command;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

/// Result of a blocking (run-to-completion) process invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `n` lines of stderr, for tail-based error classification.
    pub fn stderr_tail(&self, n: usize) -> String {
        self.stderr
            .lines()
            .rev()
            .take(n)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Build a [`tokio::process::Command`] with a hidden console window and the
/// given program/args, ready for [`run`] or [`stream_lines`].
pub fn command(program: &str, args: &[String]) -> tokio::process::Command {
    let mut cmd = tokio_command(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Run a process to completion, capturing stdout/stderr, subject to a
/// timeout and a cancellation token. On cancellation the child is killed and
/// `Err(Error::Process("canceled"))` is returned.
pub async fn run(
    mut cmd: tokio::process::Command,
    timeout: Duration,
    cancellation_token: &CancellationToken,
) -> Result<ProcessOutput> {
    let mut child = cmd.spawn().map_err(|e| Error::Process(e.to_string()))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let output_fut = async {
        let stdout_task = tokio::spawn(read_all(stdout));
        let stderr_task = tokio::spawn(read_all(stderr));
        let status = child.wait().await;
        let stdout_text = stdout_task.await.unwrap_or_default();
        let stderr_text = stderr_task.await.unwrap_or_default();
        (status, stdout_text, stderr_text)
    };

    tokio::select! {
        _ = cancellation_token.cancelled() => {
            let _ = child.kill().await;
            Err(Error::Process("canceled".into()))
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            Err(Error::Process(format!("timed out after {timeout:?}")))
        }
        (status, stdout_text, stderr_text) = output_fut => {
            match status {
                Ok(exit_status) => Ok(ProcessOutput {
                    exit_code: exit_status.code(),
                    stdout: stdout_text,
                    stderr: stderr_text,
                }),
                Err(e) => {
                    warn!(error = %e, "error waiting for child process");
                    Err(Error::Process(e.to_string()))
                }
            }
        }
    }
}

async fn read_all(stream: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    let Some(stream) = stream else {
        return String::new();
    };
    let mut reader = BufReader::new(stream);
    let mut buf = String::new();
    let mut out = String::new();
    loop {
        buf.clear();
        match reader.read_line(&mut buf).await {
            Ok(0) => break,
            Ok(_) => out.push_str(&buf),
            Err(_) => break,
        }
    }
    out
}

/// A handle to a spawned, still-running child process, for streaming
/// callers (the download supervisor parsing progress lines in real time).
pub struct StreamingProcess {
    pub child: Child,
}

impl StreamingProcess {
    pub fn spawn(mut cmd: tokio::process::Command) -> Result<Self> {
        let child = cmd.spawn().map_err(|e| Error::Process(e.to_string()))?;
        Ok(Self { child })
    }

    /// Take the stderr stream as a line iterator. The extractor/muxer write
    /// progress to stderr; stdout is drained separately to avoid backpressure.
    pub fn stderr_lines(&mut self) -> Option<tokio::io::Lines<BufReader<tokio::process::ChildStderr>>> {
        self.child.stderr.take().map(|s| BufReader::new(s).lines())
    }

    pub fn drain_stdout(&mut self) {
        if let Some(stdout) = self.child.stdout.take() {
            tokio::spawn(read_all(Some(stdout)));
        }
    }

    /// Wait for exit, killing the child on cancellation. Mirrors
    /// `spawn_process_waiter`'s select-over-cancellation-vs-wait shape.
    pub async fn wait(&mut self, cancellation_token: &CancellationToken) -> Option<i32> {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                let _ = self.child.kill().await;
                None
            }
            status = self.child.wait() => {
                match status {
                    Ok(exit_status) => exit_status.code(),
                    Err(e) => {
                        warn!(error = %e, "error waiting for child process");
                        Some(-1)
                    }
                }
            }
        }
    }

    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout_and_exit_code() {
        let cmd = command("echo", &["hello".to_string()]);
        let token = CancellationToken::new();
        let output = run(cmd, Duration::from_secs(5), &token).await.unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let cmd = command("sh", &["-c".to_string(), "exit 3".to_string()]);
        let token = CancellationToken::new();
        let output = run(cmd, Duration::from_secs(5), &token).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn run_is_canceled_by_token() {
        let cmd = command("sleep", &["5".to_string()]);
        let token = CancellationToken::new();
        let token2 = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token2.cancel();
        });
        let result = run(cmd, Duration::from_secs(10), &token).await;
        assert!(result.is_err());
    }

    #[test]
    fn stderr_tail_keeps_last_n_lines_in_order() {
        let out = ProcessOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "a\nb\nc\nd\n".to_string(),
        };
        assert_eq!(out.stderr_tail(2), "c\nd");
    }
}
