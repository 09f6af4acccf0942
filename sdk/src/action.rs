//! Typed action schema
//!
//! Plans arrive from the model as loose JSON (`{"action": ..., "parameters": {...}}`).
//! Before anything is risk-gated or executed, that pair must validate into exactly
//! one [`Action`] variant. Everything downstream of validation works with the typed
//! value; raw JSON never reaches an operation handler.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Capability an action belongs to. One handler is registered per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
    FileOp,
    GitOp,
    ProcessOp,
    NetworkOp,
    SystemInfo,
    AppLaunch,
    PythonExec,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::Command,
        ActionKind::FileOp,
        ActionKind::GitOp,
        ActionKind::ProcessOp,
        ActionKind::NetworkOp,
        ActionKind::SystemInfo,
        ActionKind::AppLaunch,
        ActionKind::PythonExec,
    ];

    /// Canonical wire name
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Command => "command",
            ActionKind::FileOp => "file_op",
            ActionKind::GitOp => "git_op",
            ActionKind::ProcessOp => "process_op",
            ActionKind::NetworkOp => "network_op",
            ActionKind::SystemInfo => "system_info",
            ActionKind::AppLaunch => "app_launch",
            ActionKind::PythonExec => "python_exec",
        }
    }

    /// Resolve a model-supplied action name, accepting a few common aliases.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        let kind = match normalized.as_str() {
            "command" | "shell" | "run_command" | "terminal" => ActionKind::Command,
            "file_op" | "file" | "filesystem" | "file_operation" => ActionKind::FileOp,
            "git_op" | "git" | "git_operation" => ActionKind::GitOp,
            "process_op" | "process" | "process_operation" => ActionKind::ProcessOp,
            "network_op" | "network" | "network_operation" => ActionKind::NetworkOp,
            "system_info" | "sysinfo" | "system_stats" => ActionKind::SystemInfo,
            "app_launch" | "launch" | "launch_app" | "open_app" => ActionKind::AppLaunch,
            "python_exec" | "python" | "script" | "run_python" => ActionKind::PythonExec,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a planned step could not become a typed [`Action`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionSchemaError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("parameters for '{0}' must be a JSON object")]
    ParametersNotObject(String),

    #[error("invalid parameters for '{action}': {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("'{action}' requires a non-empty '{field}'")]
    MissingField { action: String, field: String },
}

/// Shell command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandParams {
    pub command: String,

    /// Working directory; falls back to the configured workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Regex that stdout must match for the command to count as verified
    #[serde(default, alias = "expected_output", skip_serializing_if = "Option::is_none")]
    pub expect_output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Create,
    Read,
    Edit,
    Delete,
    Move,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileParams {
    #[serde(alias = "operation")]
    pub op: FileOperation,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, alias = "dest", skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitOperation {
    Init,
    Status,
    Add,
    Commit,
    Push,
    Pull,
    Clone,
    Branch,
    Checkout,
    Log,
    Diff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitParams {
    #[serde(alias = "operation")]
    pub op: GitOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Clone target directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Branch name for `branch` / `checkout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

impl GitParams {
    /// Argument vector passed to `git`, without the program name.
    ///
    /// Arguments are passed directly, never through a shell.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self.op {
            GitOperation::Init => args.push("init".into()),
            GitOperation::Status => {
                args.extend(["status".into(), "--short".into(), "--branch".into()])
            }
            GitOperation::Add => {
                args.push("add".into());
                if self.files.is_empty() {
                    args.push(".".into());
                } else {
                    args.push("--".into());
                    args.extend(self.files.iter().cloned());
                }
            }
            GitOperation::Commit => {
                args.extend(["commit".into(), "-m".into()]);
                args.push(self.message.clone().unwrap_or_else(|| "Update".into()));
            }
            GitOperation::Push | GitOperation::Pull => {
                args.push(if self.op == GitOperation::Push { "push" } else { "pull" }.into());
                if self.force && self.op == GitOperation::Push {
                    args.push("--force".into());
                }
                args.push(self.remote.clone().unwrap_or_else(|| "origin".into()));
                if let Some(branch) = &self.branch {
                    args.push(branch.clone());
                }
            }
            GitOperation::Clone => {
                args.push("clone".into());
                if let Some(url) = &self.url {
                    args.push(url.clone());
                }
                if let Some(path) = &self.path {
                    args.push(path.clone());
                }
            }
            GitOperation::Branch => {
                args.push("branch".into());
                if let Some(name) = &self.name {
                    args.push(name.clone());
                }
            }
            GitOperation::Checkout => {
                args.push("checkout".into());
                args.push(
                    self.name
                        .clone()
                        .or_else(|| self.branch.clone())
                        .unwrap_or_else(|| "main".into()),
                );
            }
            GitOperation::Log => {
                args.extend(["log".into(), "--oneline".into(), "-n".into(), "20".into()])
            }
            GitOperation::Diff => {
                args.extend(["diff".into(), "--stat".into()]);
            }
        }
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessOperation {
    List,
    Kill,
    Find,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessParams {
    #[serde(alias = "operation")]
    pub op: ProcessOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkOperation {
    Ping,
    CheckPort,
    ListInterfaces,
}

fn default_host() -> String {
    "8.8.8.8".to_string()
}

fn default_port() -> u16 {
    80
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkParams {
    #[serde(alias = "operation")]
    pub op: NetworkOperation,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemInfoParams {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppLaunchParams {
    #[serde(alias = "application")]
    pub app: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Process name to look for when verifying the launch; defaults to the app's file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
}

impl AppLaunchParams {
    pub fn expected_process_name(&self) -> String {
        if let Some(name) = &self.process_name {
            return name.clone();
        }
        std::path::Path::new(&self.app)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.app.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptParams {
    pub code: String,
    /// Interpreter override; falls back to the configured interpreter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default, alias = "expected_output", skip_serializing_if = "Option::is_none")]
    pub expect_output: Option<String>,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// A validated, typed action
///
/// Serialized adjacently tagged, matching the plan format:
/// `{"action": "command", "parameters": {"command": "ls"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "parameters", rename_all = "snake_case")]
pub enum Action {
    Command(CommandParams),
    FileOp(FileParams),
    GitOp(GitParams),
    ProcessOp(ProcessParams),
    NetworkOp(NetworkParams),
    SystemInfo(SystemInfoParams),
    AppLaunch(AppLaunchParams),
    PythonExec(ScriptParams),
}

impl Action {
    /// Validate a model-supplied `(action, parameters)` pair into a typed action.
    ///
    /// `null` parameters are treated as an empty object. Any other non-object
    /// value is rejected.
    pub fn from_parts(name: &str, parameters: &Value) -> Result<Self, ActionSchemaError> {
        let kind = ActionKind::from_name(name)
            .ok_or_else(|| ActionSchemaError::UnknownAction(name.to_string()))?;

        let parameters = match parameters {
            Value::Null => Value::Object(serde_json::Map::new()),
            Value::Object(_) => parameters.clone(),
            _ => return Err(ActionSchemaError::ParametersNotObject(kind.name().to_string())),
        };

        let tagged = serde_json::json!({
            "action": kind.name(),
            "parameters": parameters,
        });

        let action: Action =
            serde_json::from_value(tagged).map_err(|e| ActionSchemaError::InvalidParameters {
                action: kind.name().to_string(),
                reason: e.to_string(),
            })?;

        action.validate()?;
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Command(_) => ActionKind::Command,
            Action::FileOp(_) => ActionKind::FileOp,
            Action::GitOp(_) => ActionKind::GitOp,
            Action::ProcessOp(_) => ActionKind::ProcessOp,
            Action::NetworkOp(_) => ActionKind::NetworkOp,
            Action::SystemInfo(_) => ActionKind::SystemInfo,
            Action::AppLaunch(_) => ActionKind::AppLaunch,
            Action::PythonExec(_) => ActionKind::PythonExec,
        }
    }

    /// Parameters as a JSON object
    pub fn parameters(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("parameters").map(Value::take))
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    /// Semantic checks serde cannot express
    pub fn validate(&self) -> Result<(), ActionSchemaError> {
        let kind = self.kind();
        let missing = |field: &str| ActionSchemaError::MissingField {
            action: kind.name().to_string(),
            field: field.to_string(),
        };
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |s| s.trim().is_empty());

        match self {
            Action::Command(p) => {
                if p.command.trim().is_empty() {
                    return Err(missing("command"));
                }
            }
            Action::FileOp(p) => {
                if p.path.trim().is_empty() {
                    return Err(missing("path"));
                }
                match p.op {
                    FileOperation::Edit if p.content.is_none() => return Err(missing("content")),
                    FileOperation::Move if blank(&p.destination) => {
                        return Err(missing("destination"))
                    }
                    _ => {}
                }
            }
            Action::GitOp(p) => match p.op {
                GitOperation::Commit if blank(&p.message) => return Err(missing("message")),
                GitOperation::Clone if blank(&p.url) => return Err(missing("url")),
                GitOperation::Checkout if blank(&p.name) && blank(&p.branch) => {
                    return Err(missing("name"))
                }
                _ => {}
            },
            Action::ProcessOp(p) => match p.op {
                ProcessOperation::Kill if p.pid.is_none() && blank(&p.name) => {
                    return Err(missing("pid"))
                }
                ProcessOperation::Find if blank(&p.name) => return Err(missing("name")),
                _ => {}
            },
            Action::NetworkOp(p) => {
                if p.op != NetworkOperation::ListInterfaces && p.host.trim().is_empty() {
                    return Err(missing("host"));
                }
            }
            Action::SystemInfo(_) => {}
            Action::AppLaunch(p) => {
                if p.app.trim().is_empty() {
                    return Err(missing("app"));
                }
            }
            Action::PythonExec(p) => {
                if p.code.trim().is_empty() {
                    return Err(missing("code"));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Command(p) => write!(f, "command `{}`", p.command),
            Action::FileOp(p) => write!(f, "file {:?} {}", p.op, p.path),
            Action::GitOp(p) => write!(f, "git {}", p.to_args().join(" ")),
            Action::ProcessOp(p) => write!(f, "process {:?}", p.op),
            Action::NetworkOp(p) => write!(f, "network {:?} {}:{}", p.op, p.host, p.port),
            Action::SystemInfo(_) => f.write_str("system_info"),
            Action::AppLaunch(p) => write!(f, "launch {}", p.app),
            Action::PythonExec(_) => f.write_str("python script"),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split_whitespace().map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    })
}
