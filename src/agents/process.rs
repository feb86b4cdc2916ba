//! External command execution for agents (type-checkers, builds, installers).

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

const MAX_CAPTURED_CHARS: usize = 200_000;

/// Result of a finished or timed-out command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout and stderr joined, for parsers that do not care which stream.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            _ => self.stderr.clone(),
        }
    }

    /// Last `lines` lines of combined output.
    pub fn tail(&self, lines: usize) -> String {
        let combined = self.combined();
        let all: Vec<&str> = combined.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Run `command` (program followed by arguments) in `cwd`.
///
/// The child is killed if `timeout` elapses; that case is reported through
/// `timed_out` rather than as an error. Spawn failures are errors.
pub async fn run_command(
    command: &[String],
    cwd: &Path,
    timeout: Duration,
) -> anyhow::Result<CommandOutput> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty command"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to start '{}': {}", program, e))?;

    let started = Instant::now();
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: sanitize(&output.stdout),
            stderr: sanitize(&output.stderr),
            timed_out: false,
            duration: started.elapsed(),
        }),
        Ok(Err(e)) => Err(anyhow::anyhow!("failed to wait for '{}': {}", program, e)),
        Err(_) => Ok(CommandOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            duration: started.elapsed(),
        }),
    }
}

/// Lossy UTF-8 with control characters removed and length capped.
fn sanitize(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.chars()
        .filter(|&c| c == '\n' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .take(MAX_CAPTURED_CHARS)
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let dir = std::env::temp_dir();
        let out = run_command(&sh("echo out; echo err >&2; exit 3"), &dir, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = std::env::temp_dir();
        let out = run_command(&sh("sleep 5"), &dir, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(out.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let dir = std::env::temp_dir();
        let command = vec!["definitely-not-a-real-program-4821".to_string()];
        assert!(run_command(&command, &dir, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_command_is_error() {
        let dir = std::env::temp_dir();
        assert!(run_command(&[], &dir, Duration::from_secs(1)).await.is_err());
    }

    #[test]
    fn test_tail() {
        let out = CommandOutput {
            exit_code: Some(1),
            stdout: "a\nb\nc".to_string(),
            stderr: String::new(),
            timed_out: false,
            duration: Duration::ZERO,
        };
        assert_eq!(out.tail(2), "b\nc");
    }
}
