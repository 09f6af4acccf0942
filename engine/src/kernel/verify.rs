//! Independent post-condition checks
//!
//! A handler's own report is never taken as proof. Each check looks at the
//! world again (file system, process table, a second probe) and either confirms
//! the claimed effect or refutes it with a reason.

use regex::Regex;
use sdk::action::{
    FileOperation, GitOperation, NetworkOperation, ProcessOperation,
};
use sdk::{Action, RawOutcome};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::tools::filesystem::move_target;
use crate::tools::network::probe_port;
use crate::tools::process::{list_processes, pid_alive};
use crate::tools::{resolve_cwd, resolve_path};

/// Delay between re-checks that a signalled process is gone
const KILL_RECHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Linux truncates `comm` to this many bytes
const COMM_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Confirmed { confidence: f64 },
    Refuted(String),
}

impl Verdict {
    fn confirmed() -> Self {
        Verdict::Confirmed { confidence: 1.0 }
    }

    fn refuted(reason: impl Into<String>) -> Self {
        Verdict::Refuted(reason.into())
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    workspace: PathBuf,
    probe_timeout: Duration,
    launch_attempts: u32,
    launch_backoff: Duration,
    kill_attempts: u32,
}

impl Verifier {
    pub fn new(workspace: PathBuf, execution: &ExecutionConfig) -> Self {
        Self {
            workspace,
            probe_timeout: Duration::from_millis(execution.probe_timeout_ms),
            launch_attempts: execution.launch_verify_attempts.max(1),
            launch_backoff: Duration::from_millis(execution.launch_verify_backoff_ms),
            kill_attempts: execution.kill_verify_attempts.max(1),
        }
    }

    pub async fn verify(&self, action: &Action, outcome: &RawOutcome) -> Verdict {
        let verdict = match (action, outcome) {
            (Action::Command(p), RawOutcome::Exited { code, stdout, stderr }) => {
                verify_exit(*code, stdout, stderr, p.expect_output.as_deref())
            }
            (Action::PythonExec(p), RawOutcome::Exited { code, stdout, stderr }) => {
                verify_exit(*code, stdout, stderr, p.expect_output.as_deref())
            }
            (Action::GitOp(p), RawOutcome::Exited { code, stdout, stderr }) => {
                match verify_exit(*code, stdout, stderr, None) {
                    Verdict::Confirmed { .. } => {
                        let cwd = resolve_cwd(&self.workspace, p.cwd.as_deref());
                        match p.op {
                            GitOperation::Init => expect_dir(&cwd.join(".git")),
                            GitOperation::Clone => {
                                match clone_target(&cwd, p.path.as_deref(), p.url.as_deref()) {
                                    Some(target) => expect_dir(&target),
                                    None => Verdict::refuted("cannot determine clone target"),
                                }
                            }
                            _ => Verdict::confirmed(),
                        }
                    }
                    refuted => refuted,
                }
            }
            (Action::FileOp(p), RawOutcome::Text { .. }) => {
                let path = resolve_path(&self.workspace, &p.path);
                match p.op {
                    FileOperation::Create | FileOperation::Edit => {
                        expect_contents(&path, p.content.as_deref().unwrap_or("")).await
                    }
                    FileOperation::Read => expect_readable_file(&path).await,
                    FileOperation::Delete => {
                        if tokio::fs::symlink_metadata(&path).await.is_ok() {
                            Verdict::refuted(format!("{} still exists", path.display()))
                        } else {
                            Verdict::confirmed()
                        }
                    }
                    FileOperation::Move => {
                        let destination =
                            resolve_path(&self.workspace, p.destination.as_deref().unwrap_or(""));
                        let target = move_target(&path, &destination);
                        if path.exists() {
                            Verdict::refuted(format!("source {} still exists", path.display()))
                        } else if !target.exists() {
                            Verdict::refuted(format!("destination {} missing", target.display()))
                        } else {
                            Verdict::confirmed()
                        }
                    }
                    FileOperation::List => expect_dir(&path),
                }
            }
            (Action::AppLaunch(_), RawOutcome::Spawned { program, .. }) => {
                self.expect_process_named(program).await
            }
            (Action::ProcessOp(p), outcome) => match (p.op, outcome) {
                (ProcessOperation::Kill, RawOutcome::Signalled { pids }) => {
                    self.expect_pids_gone(pids).await
                }
                (ProcessOperation::List | ProcessOperation::Find, RawOutcome::Data { data }) => {
                    expect_non_empty_array(data, "no matching processes")
                }
                _ => unexpected(outcome),
            },
            (Action::NetworkOp(p), outcome) => match (p.op, outcome) {
                (NetworkOperation::Ping, RawOutcome::Exited { code, stdout, stderr }) => {
                    verify_exit(*code, stdout, stderr, None)
                }
                (NetworkOperation::CheckPort, RawOutcome::Data { data }) => {
                    let claimed = data.get("open").and_then(Value::as_bool);
                    let observed = probe_port(&p.host, p.port, self.probe_timeout).await;
                    match claimed {
                        Some(claimed) if claimed == observed => Verdict::confirmed(),
                        Some(_) => Verdict::refuted(format!(
                            "port {} on {} changed state on re-probe",
                            p.port, p.host
                        )),
                        None => Verdict::refuted("port check reported no state"),
                    }
                }
                (NetworkOperation::ListInterfaces, RawOutcome::Data { data }) => {
                    expect_non_empty_array(data, "no network interfaces found")
                }
                _ => unexpected(outcome),
            },
            (Action::SystemInfo(_), RawOutcome::Data { data }) => {
                match data.get("cpu_count").and_then(Value::as_u64) {
                    Some(n) if n > 0 => Verdict::confirmed(),
                    _ => Verdict::refuted("system stats missing a positive cpu_count"),
                }
            }
            (_, outcome) => unexpected(outcome),
        };

        debug!(action = %action.kind(), ?verdict, "Post-condition checked");
        verdict
    }

    async fn expect_process_named(&self, program: &str) -> Verdict {
        let wanted = program.to_lowercase();
        let truncated: String = wanted.chars().take(COMM_LEN).collect();
        let mut delay = self.launch_backoff;

        for attempt in 1..=self.launch_attempts {
            if let Ok(processes) = list_processes().await {
                let found = processes.iter().any(|p| {
                    let name = p.name.to_lowercase();
                    name == wanted
                        || name == truncated
                        || name.trim_end_matches(".exe") == wanted.trim_end_matches(".exe")
                });
                if found {
                    return Verdict::confirmed();
                }
            }
            if attempt < self.launch_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Verdict::refuted(format!(
            "no process named '{}' observed after {} checks",
            program, self.launch_attempts
        ))
    }

    async fn expect_pids_gone(&self, pids: &[u32]) -> Verdict {
        if pids.is_empty() {
            return Verdict::refuted("no process was signalled");
        }

        for attempt in 1..=self.kill_attempts {
            let alive: Vec<u32> = pids.iter().copied().filter(|pid| pid_alive(*pid)).collect();
            if alive.is_empty() {
                return Verdict::confirmed();
            }
            if attempt == self.kill_attempts {
                let list: Vec<String> = alive.iter().map(u32::to_string).collect();
                return Verdict::refuted(format!("pid(s) still running: {}", list.join(", ")));
            }
            tokio::time::sleep(KILL_RECHECK_INTERVAL).await;
        }

        Verdict::refuted("process state could not be checked")
    }
}

fn verify_exit(
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    expect_output: Option<&str>,
) -> Verdict {
    if code != Some(0) {
        let detail = stderr.lines().next().unwrap_or("").trim();
        let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        return if detail.is_empty() {
            Verdict::refuted(format!("exit code {}", code))
        } else {
            Verdict::refuted(format!("exit code {}: {}", code, detail))
        };
    }

    match expect_output {
        Some(pattern) if !pattern.is_empty() => {
            // An invalid pattern is matched literally
            let matched = match Regex::new(pattern) {
                Ok(re) => re.is_match(stdout),
                Err(_) => stdout.contains(pattern),
            };
            if matched {
                Verdict::confirmed()
            } else {
                Verdict::refuted(format!("output did not match expected '{}'", pattern))
            }
        }
        // Exit status alone is weaker evidence than a matched output
        _ => Verdict::Confirmed { confidence: 0.9 },
    }
}

fn expect_dir(path: &Path) -> Verdict {
    if path.is_dir() {
        Verdict::confirmed()
    } else {
        Verdict::refuted(format!("{} is not a directory", path.display()))
    }
}

async fn expect_contents(path: &Path, expected: &str) -> Verdict {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes == expected.as_bytes() => Verdict::confirmed(),
        Ok(bytes) => Verdict::refuted(format!(
            "{} holds {} bytes, expected {}",
            path.display(),
            bytes.len(),
            expected.len()
        )),
        Err(e) => Verdict::refuted(format!("{} unreadable: {}", path.display(), e)),
    }
}

async fn expect_readable_file(path: &Path) -> Verdict {
    if !path.is_file() {
        return Verdict::refuted(format!("{} is not a file", path.display()));
    }
    match tokio::fs::File::open(path).await {
        Ok(_) => Verdict::confirmed(),
        Err(e) => Verdict::refuted(format!("{} unreadable: {}", path.display(), e)),
    }
}

fn expect_non_empty_array(data: &Value, reason: &str) -> Verdict {
    match data.as_array() {
        Some(items) if !items.is_empty() => Verdict::confirmed(),
        _ => Verdict::refuted(reason),
    }
}

fn unexpected(outcome: &RawOutcome) -> Verdict {
    Verdict::refuted(format!(
        "handler returned an unexpected outcome: {}",
        serde_json::to_value(outcome)
            .ok()
            .and_then(|v| v.get("kind").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    ))
}

/// Directory `git clone` creates
fn clone_target(cwd: &Path, path: Option<&str>, url: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = path.filter(|p| !p.trim().is_empty()) {
        return Some(resolve_path(cwd, path));
    }
    let url = url?.trim_end_matches('/');
    let name = url.rsplit(['/', ':']).next()?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    (!name.is_empty()).then(|| cwd.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verifier(dir: &Path) -> Verifier {
        let config = ExecutionConfig {
            launch_verify_attempts: 2,
            launch_verify_backoff_ms: 10,
            kill_verify_attempts: 2,
            ..ExecutionConfig::default()
        };
        Verifier::new(dir.to_path_buf(), &config)
    }

    #[test]
    fn test_exit_code_refutes() {
        let verdict = verify_exit(Some(1), "", "boom\nmore", None);
        assert_eq!(verdict, Verdict::Refuted("exit code 1: boom".into()));
    }

    #[test]
    fn test_expect_output_regex() {
        assert_eq!(
            verify_exit(Some(0), "version 1.2.3", "", Some(r"\d+\.\d+")),
            Verdict::Confirmed { confidence: 1.0 }
        );
        assert!(matches!(
            verify_exit(Some(0), "nothing", "", Some("version")),
            Verdict::Refuted(_)
        ));
    }

    #[test]
    fn test_invalid_expect_pattern_matched_literally() {
        assert_eq!(
            verify_exit(Some(0), "a (b", "", Some("(b")),
            Verdict::Confirmed { confidence: 1.0 }
        );
    }

    #[test]
    fn test_clone_target() {
        let cwd = Path::new("/w");
        assert_eq!(
            clone_target(cwd, None, Some("https://github.com/org/repo.git")),
            Some(PathBuf::from("/w/repo"))
        );
        assert_eq!(
            clone_target(cwd, Some("dest"), Some("https://x/y.git")),
            Some(PathBuf::from("/w/dest"))
        );
        assert_eq!(
            clone_target(cwd, None, Some("git@github.com:org/tool")),
            Some(PathBuf::from("/w/tool"))
        );
    }

    #[tokio::test]
    async fn test_create_content_mismatch_refuted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "other").unwrap();

        let action = Action::from_parts(
            "file_op",
            &json!({"op": "create", "path": "a.txt", "content": "expected"}),
        )
        .unwrap();
        let verdict = verifier(dir.path())
            .verify(&action, &RawOutcome::Text { text: "File created".into() })
            .await;
        assert!(matches!(verdict, Verdict::Refuted(_)));
    }

    #[tokio::test]
    async fn test_delete_confirmed_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let action =
            Action::from_parts("file_op", &json!({"op": "delete", "path": "gone.txt"})).unwrap();
        let verdict = verifier(dir.path())
            .verify(&action, &RawOutcome::Text { text: "Deleted".into() })
            .await;
        assert_eq!(verdict, Verdict::Confirmed { confidence: 1.0 });
    }

    #[tokio::test]
    async fn test_launch_unobserved_refuted() {
        let dir = tempfile::tempdir().unwrap();
        let action =
            Action::from_parts("app_launch", &json!({"app": "no-such-app-luna"})).unwrap();
        let outcome = RawOutcome::Spawned {
            pid: 1,
            program: "no-such-app-luna".into(),
        };
        let verdict = verifier(dir.path()).verify(&action, &outcome).await;
        assert!(matches!(verdict, Verdict::Refuted(ref r) if r.contains("after 2 checks")));
    }

    #[tokio::test]
    async fn test_empty_find_refuted() {
        let dir = tempfile::tempdir().unwrap();
        let action =
            Action::from_parts("process_op", &json!({"op": "find", "name": "zzz"})).unwrap();
        let verdict = verifier(dir.path())
            .verify(&action, &RawOutcome::Data { data: json!([]) })
            .await;
        assert!(matches!(verdict, Verdict::Refuted(_)));
    }

    #[tokio::test]
    async fn test_mismatched_outcome_refuted() {
        let dir = tempfile::tempdir().unwrap();
        let action = Action::from_parts("system_info", &json!({})).unwrap();
        let verdict = verifier(dir.path())
            .verify(&action, &RawOutcome::Text { text: "ok".into() })
            .await;
        assert!(matches!(verdict, Verdict::Refuted(ref r) if r.contains("text")));
    }
}
