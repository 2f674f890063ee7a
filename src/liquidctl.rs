use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const LIQUIDCTL_COMMAND: &str = "liquidctl";
const STATUS_ARGS: &[&str] = &["status"];

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{command} did not finish within {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },
    #[error("{command} produced no output")]
    EmptyOutput { command: String },
}

impl CommandError {
    /// True when the program itself is missing from the system.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CommandError::Spawn { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Run `liquidctl status` and capture its stdout.
pub async fn run_status(timeout_secs: u64) -> Result<String, CommandError> {
    run_capture(LIQUIDCTL_COMMAND, STATUS_ARGS, timeout_secs).await
}

/// Run a program to completion and return its stdout as UTF-8 text.
/// The child is killed if it does not finish within the timeout.
pub(crate) async fn run_capture(
    program: &str,
    args: &[&str],
    timeout_secs: u64,
) -> Result<String, CommandError> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("Running {}", command);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), output).await {
        Ok(result) => result.map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?,
        Err(_) => {
            return Err(CommandError::TimedOut {
                command,
                timeout_secs,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(CommandError::Failed {
            command,
            status: output.status,
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(CommandError::EmptyOutput { command });
    }
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_of_a_successful_command() {
        let out = run_capture("echo", &["hello", "world"], 5).await.unwrap();
        assert_eq!(out.trim(), "hello world");
    }

    #[tokio::test]
    async fn missing_binary_reports_not_found() {
        let err = run_capture("liquidctl2mqtt-no-such-binary", &[], 5)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_reports_status_and_stderr() {
        let err = run_capture("sh", &["-c", "echo oops >&2; exit 3"], 5)
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = run_capture("sleep", &["5"], 1).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::TimedOut { timeout_secs: 1, .. }
        ));
    }

    #[tokio::test]
    async fn silent_command_reports_empty_output() {
        let err = run_capture("true", &[], 5).await.unwrap_err();
        assert!(matches!(err, CommandError::EmptyOutput { .. }));
    }
}
