//! Application launch handler
//!
//! Starts the application detached and returns immediately. Whether it is
//! actually running is checked by the kernel against the process table.

use async_trait::async_trait;
use sdk::{Action, ActionKind, HandlerError, OperationHandler, RawOutcome};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

#[derive(Debug)]
pub struct AppLaunchHandler {
    workspace: PathBuf,
}

impl AppLaunchHandler {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[cfg(target_os = "macos")]
fn launch_command(app: &str, args: &[String]) -> Command {
    let mut cmd = Command::new("open");
    cmd.args(["-a", app]);
    if !args.is_empty() {
        cmd.arg("--args").args(args);
    }
    cmd
}

#[cfg(windows)]
fn launch_command(app: &str, args: &[String]) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", "", app]).args(args);
    cmd
}

#[cfg(all(unix, not(target_os = "macos")))]
fn launch_command(app: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(app);
    cmd.args(args);
    cmd
}

#[async_trait]
impl OperationHandler for AppLaunchHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::AppLaunch
    }

    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError> {
        let Action::AppLaunch(params) = action else {
            return Err(HandlerError::InvalidParameters(format!(
                "launch handler cannot run {}",
                action.kind()
            )));
        };

        info!("Launching {}", params.app);

        // Not kill_on_drop: the application must outlive this call
        let child = launch_command(&params.app, &params.args)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HandlerError::Failed(format!("Failed to launch {}: {}", params.app, e)))?;

        let pid = child.id().unwrap_or(0);

        Ok(RawOutcome::Spawned {
            pid,
            program: params.expected_process_name(),
        })
    }
}

#[cfg(all(test, unix, not(target_os = "macos")))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_launch_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let handler = AppLaunchHandler::new(dir.path().to_path_buf());
        let action =
            Action::from_parts("app_launch", &json!({"app": "definitely-not-installed-luna"}))
                .unwrap();
        assert!(matches!(
            handler.run(&action).await,
            Err(HandlerError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_reports_pid() {
        let dir = tempfile::tempdir().unwrap();
        let handler = AppLaunchHandler::new(dir.path().to_path_buf());
        let action =
            Action::from_parts("app_launch", &json!({"app": "sleep", "args": ["2"]})).unwrap();
        let outcome = handler.run(&action).await.unwrap();
        match outcome {
            RawOutcome::Spawned { pid, program } => {
                assert!(pid > 0);
                assert_eq!(program, "sleep");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
