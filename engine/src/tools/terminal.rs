//! Terminal handlers
//!
//! Shell commands, git, and interpreter scripts. All three go through
//! `CommandRunner`, which enforces the timeout, the pipe guard and
//! kill-on-drop for cancelled runs.

use async_trait::async_trait;
use sdk::{Action, ActionKind, HandlerError, OperationHandler, RawOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use super::resolve_cwd;
use crate::command_executor::{CommandError, CommandOutput, CommandRunner};

impl From<CommandError> for HandlerError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Empty => HandlerError::InvalidParameters("empty command".to_string()),
            CommandError::Timeout(secs) => HandlerError::Timeout(secs),
            CommandError::DangerousPipeDetected => HandlerError::Failed(err.to_string()),
            CommandError::ExecutionFailed(io) => HandlerError::Io(io),
        }
    }
}

fn exited(output: CommandOutput) -> RawOutcome {
    RawOutcome::Exited {
        code: output.code,
        stdout: output.stdout,
        stderr: output.stderr,
    }
}

fn wrong_kind(expected: ActionKind, action: &Action) -> HandlerError {
    HandlerError::InvalidParameters(format!(
        "{} handler cannot run {}",
        expected,
        action.kind()
    ))
}

/// Shell command handler
#[derive(Debug)]
pub struct CommandHandler {
    runner: CommandRunner,
    workspace: PathBuf,
}

impl CommandHandler {
    pub fn new(runner: CommandRunner, workspace: PathBuf) -> Self {
        Self { runner, workspace }
    }
}

#[async_trait]
impl OperationHandler for CommandHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Command
    }

    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError> {
        let Action::Command(params) = action else {
            return Err(wrong_kind(ActionKind::Command, action));
        };

        let cwd = resolve_cwd(&self.workspace, params.cwd.as_deref());
        info!("Executing command in {}", cwd.display());

        let output = self
            .runner
            .run_shell(
                &params.command,
                Some(&cwd),
                params.timeout_secs.map(Duration::from_secs),
            )
            .await?;

        if !output.success() {
            warn!(code = ?output.code, "Command exited unsuccessfully");
        }
        Ok(exited(output))
    }
}

/// Git handler. Arguments are passed to `git` directly, never through a shell.
#[derive(Debug)]
pub struct GitHandler {
    runner: CommandRunner,
    workspace: PathBuf,
}

impl GitHandler {
    pub fn new(runner: CommandRunner, workspace: PathBuf) -> Self {
        Self { runner, workspace }
    }
}

#[async_trait]
impl OperationHandler for GitHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::GitOp
    }

    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError> {
        let Action::GitOp(params) = action else {
            return Err(wrong_kind(ActionKind::GitOp, action));
        };

        let cwd = resolve_cwd(&self.workspace, params.cwd.as_deref());
        if !cwd.is_dir() {
            if matches!(params.op, sdk::action::GitOperation::Init) {
                tokio::fs::create_dir_all(&cwd).await?;
            } else {
                return Err(HandlerError::Failed(format!(
                    "Repository directory not found: {}",
                    cwd.display()
                )));
            }
        }

        let args = params.to_args();
        info!("Running git {} in {}", args.join(" "), cwd.display());

        let output = self.runner.run_program("git", &args, Some(&cwd), None).await?;
        Ok(exited(output))
    }
}

/// Interpreter script handler
///
/// The code is written to a temporary file which is removed after the run,
/// whether or not it succeeded.
#[derive(Debug)]
pub struct ScriptHandler {
    runner: CommandRunner,
    workspace: PathBuf,
    interpreter: String,
}

impl ScriptHandler {
    pub fn new(runner: CommandRunner, workspace: PathBuf, interpreter: String) -> Self {
        Self {
            runner,
            workspace,
            interpreter,
        }
    }
}

#[async_trait]
impl OperationHandler for ScriptHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::PythonExec
    }

    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError> {
        let Action::PythonExec(params) = action else {
            return Err(wrong_kind(ActionKind::PythonExec, action));
        };

        let interpreter = params
            .interpreter
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .unwrap_or(&self.interpreter);

        let script = std::env::temp_dir().join(format!("luna_script_{}.py", uuid::Uuid::new_v4()));
        tokio::fs::write(&script, &params.code).await?;

        info!("Running script with {}", interpreter);
        let result = self
            .runner
            .run_program(
                interpreter,
                &[script.to_string_lossy().into_owned()],
                Some(&self.workspace),
                params.timeout_secs.map(Duration::from_secs),
            )
            .await;

        if let Err(e) = tokio::fs::remove_file(&script).await {
            warn!("Failed to remove temporary script {}: {}", script.display(), e);
        }

        Ok(exited(result?))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_command_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let handler = CommandHandler::new(CommandRunner::default(), dir.path().to_path_buf());

        let action = Action::from_parts("command", &json!({"command": "ls"})).unwrap();
        let outcome = handler.run(&action).await.unwrap();
        match outcome {
            RawOutcome::Exited { code, stdout, .. } => {
                assert_eq!(code, Some(0));
                assert!(stdout.contains("marker.txt"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_failure_is_outcome_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let handler = CommandHandler::new(CommandRunner::default(), dir.path().to_path_buf());

        let action = Action::from_parts("command", &json!({"command": "exit 2"})).unwrap();
        let outcome = handler.run(&action).await.unwrap();
        assert!(matches!(outcome, RawOutcome::Exited { code: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_command_timeout_maps_to_handler_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let handler = CommandHandler::new(CommandRunner::default(), dir.path().to_path_buf());

        let action =
            Action::from_parts("command", &json!({"command": "sleep 5", "timeout_secs": 1}))
                .unwrap();
        assert!(matches!(
            handler.run(&action).await,
            Err(HandlerError::Timeout(1))
        ));
    }

    #[tokio::test]
    async fn test_script_temp_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        // `sh` stands in for the interpreter so the test does not need python
        let handler = ScriptHandler::new(
            CommandRunner::default(),
            dir.path().to_path_buf(),
            "sh".to_string(),
        );

        let action =
            Action::from_parts("python_exec", &json!({"code": "echo $0"})).unwrap();
        let outcome = handler.run(&action).await.unwrap();
        let RawOutcome::Exited { code, stdout, .. } = outcome else {
            panic!("expected exited outcome");
        };
        assert_eq!(code, Some(0));

        let script = PathBuf::from(stdout.trim());
        assert!(script.to_string_lossy().contains("luna_script_"));
        assert!(!script.exists());
    }
}
