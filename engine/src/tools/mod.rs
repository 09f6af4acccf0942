//! Built-in operation handlers
//!
//! One handler per [`ActionKind`]. Handlers perform the side effect and return a
//! [`RawOutcome`](sdk::RawOutcome); verification happens in the kernel.

pub mod filesystem;
pub mod launcher;
pub mod network;
pub mod process;
pub mod system;
pub mod terminal;

pub use filesystem::FileOpHandler;
pub use launcher::AppLaunchHandler;
pub use network::NetworkHandler;
pub use process::ProcessHandler;
pub use system::{HostProbe, SystemInfoHandler, SystemProbe};
pub use terminal::{CommandHandler, GitHandler, ScriptHandler};

use crate::command_executor::CommandRunner;
use crate::config::ExecutionConfig;
use sdk::{ActionKind, OperationHandler};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Registry of handlers the kernel can dispatch to.
///
/// At most one handler per action kind; registering a second one replaces the first.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionKind, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry with no handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler
    pub fn with_defaults(
        workspace: PathBuf,
        execution: &ExecutionConfig,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        let runner = CommandRunner::new(Duration::from_secs(execution.command_timeout_secs));

        let mut registry = Self::empty();
        registry.register(Arc::new(CommandHandler::new(
            runner.clone(),
            workspace.clone(),
        )));
        registry.register(Arc::new(FileOpHandler::new(workspace.clone())));
        registry.register(Arc::new(GitHandler::new(runner.clone(), workspace.clone())));
        registry.register(Arc::new(ProcessHandler::new()));
        registry.register(Arc::new(NetworkHandler::new(
            runner.clone(),
            Duration::from_millis(execution.probe_timeout_ms),
        )));
        registry.register(Arc::new(SystemInfoHandler::new(probe)));
        registry.register(Arc::new(AppLaunchHandler::new(workspace.clone())));
        registry.register(Arc::new(ScriptHandler::new(
            runner,
            workspace,
            execution.script_interpreter.clone(),
        )));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) {
        let kind = handler.kind();
        debug!("Registering handler for {}", kind);
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds in a stable order
    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Describe the registered actions for the planner prompt.
    ///
    /// Only kinds with a handler are included.
    pub fn capabilities_prompt(&self) -> String {
        let mut parts = vec!["Available actions:".to_string()];
        for kind in self.kinds() {
            parts.push(String::new());
            parts.push(format!("## {}", kind.name()));
            parts.push(describe(kind).to_string());
        }
        parts.join("\n")
    }
}

fn describe(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Command => {
            r#"Run a shell command. Parameters: {"command": "...", "cwd"?: "dir", "timeout_secs"?: 60, "expect_output"?: "regex that stdout must match"}"#
        }
        ActionKind::FileOp => {
            r#"File operation. Parameters: {"op": "create|read|edit|delete|move|list", "path": "...", "content"?: "...", "destination"?: "..."}"#
        }
        ActionKind::GitOp => {
            r#"Git operation. Parameters: {"op": "init|status|add|commit|push|pull|clone|branch|checkout|log|diff", "cwd"?: "repo dir", "files"?: [..], "message"?: "...", "remote"?: "origin", "branch"?: "...", "url"?: "...", "path"?: "...", "name"?: "..."}"#
        }
        ActionKind::ProcessOp => {
            r#"Process management. Parameters: {"op": "list|kill|find", "name"?: "...", "pid"?: 123}"#
        }
        ActionKind::NetworkOp => {
            r#"Network probe. Parameters: {"op": "ping|check_port|list_interfaces", "host"?: "8.8.8.8", "port"?: 80}"#
        }
        ActionKind::SystemInfo => "Report CPU, memory, load and uptime. Parameters: {}",
        ActionKind::AppLaunch => {
            r#"Launch an application. Parameters: {"app": "...", "args"?: [..], "process_name"?: "name to look for"}"#
        }
        ActionKind::PythonExec => {
            r#"Run a Python script. Parameters: {"code": "...", "expect_output"?: "regex", "timeout_secs"?: 60}"#
        }
    }
}

/// Resolve a user-supplied path against the workspace.
///
/// `~` is expanded; relative paths are joined onto the workspace. The kernel's
/// verifier resolves paths with this same function.
pub fn resolve_path(workspace: &Path, raw: &str) -> PathBuf {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Working directory for an optional `cwd` parameter
pub fn resolve_cwd(workspace: &Path, cwd: Option<&str>) -> PathBuf {
    match cwd {
        Some(dir) if !dir.trim().is_empty() => resolve_path(workspace, dir),
        _ => workspace.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_path() {
        let ws = Path::new("/work");
        assert_eq!(resolve_path(ws, "notes/a.txt"), PathBuf::from("/work/notes/a.txt"));
        assert_eq!(resolve_path(ws, "/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_resolve_cwd_defaults_to_workspace() {
        let ws = Path::new("/work");
        assert_eq!(resolve_cwd(ws, None), PathBuf::from("/work"));
        assert_eq!(resolve_cwd(ws, Some("  ")), PathBuf::from("/work"));
        assert_eq!(resolve_cwd(ws, Some("repo")), PathBuf::from("/work/repo"));
    }

    #[test]
    fn test_default_registry_covers_every_kind() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandlerRegistry::with_defaults(
            dir.path().to_path_buf(),
            &ExecutionConfig::default(),
            Arc::new(HostProbe::new()),
        );
        assert_eq!(registry.kinds(), ActionKind::ALL.to_vec());

        let prompt = registry.capabilities_prompt();
        assert!(prompt.contains("## command"));
        assert!(prompt.contains("## python_exec"));
    }

    #[test]
    fn test_empty_registry_has_no_handlers() {
        let registry = HandlerRegistry::empty();
        assert!(registry.get(ActionKind::Command).is_none());
    }
}
