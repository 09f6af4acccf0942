//! Detector rule data
//!
//! Rules are plain data so they can live in `config.toml`. The defaults below
//! ship with the engine and are used whenever `[risk].rules` is omitted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category a detector belongs to. Informational only; weights decide the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Destructive,
    System,
    VersionControl,
    Database,
    Privilege,
    Network,
    Process,
    FileSystem,
    Install,
    Execution,
}

/// One declarative detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorRule {
    /// Stable identifier reported in `matched_rules`
    pub name: String,

    pub category: RuleCategory,

    /// Case-insensitive regular expression
    pub pattern: String,

    /// Score added when the rule matches
    pub weight: u32,

    /// Restrict the rule to these canonical action names. Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,

    /// Match against this single parameter instead of the whole action text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// Score thresholds, inclusive lower bounds of each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskThresholds {
    #[serde(default = "default_medium")]
    pub medium: u32,
    #[serde(default = "default_high")]
    pub high: u32,
    #[serde(default = "default_dangerous")]
    pub dangerous: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: default_medium(),
            high: default_high(),
            dangerous: default_dangerous(),
        }
    }
}

fn default_medium() -> u32 {
    20
}

fn default_high() -> u32 {
    50
}

fn default_dangerous() -> u32 {
    100
}

/// Exact `action + parameters` signature allowed to run despite a dangerous score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub action: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

const CRITICAL_PROCESSES: &str = r"^(init|systemd|launchd|kernel_task|csrss|wininit|winlogon|lsass|services|smss|explorer\.exe)$";

const SYSTEM_DIRECTORIES: &str =
    r"^(/etc|/bin|/sbin|/usr/bin|/usr/sbin|/boot|/sys|c:[/\\]windows)([/\\]|$)";

/// A `..` component left over after normalization: the path climbs out of the workspace
const PARENT_TRAVERSAL: &str = r"(^|[/\\])\.\.([/\\]|$)";

fn rule(name: &str, category: RuleCategory, pattern: &str, weight: u32) -> DetectorRule {
    DetectorRule {
        name: name.to_string(),
        category,
        pattern: pattern.to_string(),
        weight,
        actions: Vec::new(),
        parameter: None,
    }
}

fn scoped(
    name: &str,
    category: RuleCategory,
    pattern: &str,
    weight: u32,
    actions: &[&str],
    parameter: Option<&str>,
) -> DetectorRule {
    DetectorRule {
        actions: actions.iter().map(|a| a.to_string()).collect(),
        parameter: parameter.map(str::to_string),
        ..rule(name, category, pattern, weight)
    }
}

/// Rules shipped with the engine
pub fn default_rules() -> Vec<DetectorRule> {
    use RuleCategory::*;

    vec![
        // Dangerous (100)
        rule(
            "recursive_delete_root",
            Destructive,
            r"\brm\s+(-[a-z]*r[a-z]*f[a-z]*|-[a-z]*f[a-z]*r[a-z]*)\s+(--no-preserve-root\s+)?(/|/\*|\*|~)(\s|$)",
            100,
        ),
        rule("format_filesystem", Destructive, r"\bmkfs(\.|\s)", 100),
        rule("dd_to_device", Destructive, r"\bdd\s+.*of=/dev/", 100),
        rule("fork_bomb", System, r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", 100),
        rule(
            "recursive_chmod_root",
            Privilege,
            r"\bchmod\s+-r\s+777\s+/(\s|$)",
            100,
        ),
        rule(
            "recursive_chown_root",
            Privilege,
            r"\bchown\s+-r\s+\S+\s+/(\s|$)",
            100,
        ),
        rule(
            "power_state",
            System,
            r"\b(shutdown|reboot|poweroff|halt)\b",
            100,
        ),
        rule("init_runlevel", System, r"\binit\s+[06]\b", 100),
        rule(
            "git_force_push",
            VersionControl,
            r"\bgit\s+push\b.*\s(--force|-f)\b",
            100,
        ),
        scoped(
            "git_force_flag",
            VersionControl,
            r"^true$",
            100,
            &["git_op"],
            Some("force"),
        ),
        scoped(
            "kill_critical_process",
            Process,
            CRITICAL_PROCESSES,
            100,
            &["process_op"],
            Some("name"),
        ),
        scoped(
            "system_directory_path",
            FileSystem,
            SYSTEM_DIRECTORIES,
            100,
            &["file_op"],
            Some("path"),
        ),
        scoped(
            "system_directory_destination",
            FileSystem,
            SYSTEM_DIRECTORIES,
            100,
            &["file_op"],
            Some("destination"),
        ),
        // High (50)
        rule("recursive_delete", Destructive, r"\brm\s+-[a-z]*(rf|fr)", 50),
        scoped(
            "path_traversal",
            FileSystem,
            PARENT_TRAVERSAL,
            50,
            &["file_op"],
            Some("path"),
        ),
        scoped(
            "path_traversal_destination",
            FileSystem,
            PARENT_TRAVERSAL,
            50,
            &["file_op"],
            Some("destination"),
        ),
        rule("git_push", VersionControl, r"\bgit\s+push\b", 50),
        scoped(
            "git_push_op",
            VersionControl,
            r"^push$",
            50,
            &["git_op"],
            Some("op"),
        ),
        rule(
            "git_reset_hard",
            VersionControl,
            r"\bgit\s+reset\s+--hard\b",
            50,
        ),
        rule("drop_database", Database, r"\bdrop\s+(database|table)\b", 50),
        rule("delete_from", Database, r"\bdelete\s+from\b", 50),
        rule("truncate_table", Database, r"\btruncate\s+table\b", 50),
        rule("chmod_777", Privilege, r"\bchmod\s+(-r\s+)?777\b", 50),
        rule("sudo", Privilege, r"\bsudo\s+", 50),
        scoped(
            "file_delete",
            FileSystem,
            r"^delete$",
            50,
            &["file_op"],
            Some("op"),
        ),
        rule(
            "download_into_shell",
            Network,
            r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z|k|da)?sh\b",
            50,
        ),
        // Medium (20)
        rule("git_commit", VersionControl, r"\bgit\s+commit\b", 20),
        scoped(
            "git_commit_op",
            VersionControl,
            r"^commit$",
            20,
            &["git_op"],
            Some("op"),
        ),
        rule(
            "package_install",
            Install,
            r"\b(npm|pip3?|apt|apt-get|brew|cargo)\s+install\b",
            20,
        ),
        rule("docker_run_build", Execution, r"\bdocker\s+(run|build)\b", 20),
        rule("move", FileSystem, r"\bmv\s+", 20),
        rule("recursive_copy", FileSystem, r"\bcp\s+-r", 20),
        scoped("file_move", FileSystem, r"^move$", 20, &["file_op"], Some("op")),
        scoped("process_kill", Process, r"^kill$", 20, &["process_op"], Some("op")),
        scoped("app_launch", Execution, r".*", 20, &["app_launch"], None),
        scoped("script_execution", Execution, r".*", 20, &["python_exec"], None),
    ]
}
