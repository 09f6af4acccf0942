//! Process management handler
//!
//! list / find / kill. The process table is read from `ps` on unix and
//! `tasklist` on Windows; signals go through `nix` on unix.

use async_trait::async_trait;
use sdk::action::{ProcessOperation, ProcessParams};
use sdk::{Action, ActionKind, HandlerError, OperationHandler, RawOutcome};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

/// Upper bound on rows returned by `list`
const MAX_LISTED: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct ProcessHandler;

impl ProcessHandler {
    pub fn new() -> Self {
        Self
    }

    async fn kill(&self, params: &ProcessParams) -> Result<RawOutcome, HandlerError> {
        let own_pid = std::process::id();

        let targets: Vec<u32> = match (params.pid, params.name.as_deref()) {
            (Some(pid), _) => {
                if !pid_alive(pid) {
                    return Err(HandlerError::Failed(format!("No process with pid {}", pid)));
                }
                vec![pid]
            }
            (None, Some(name)) => {
                let matches: Vec<u32> = list_processes()
                    .await?
                    .into_iter()
                    .filter(|p| p.name.eq_ignore_ascii_case(name))
                    .map(|p| p.pid)
                    .collect();
                if matches.is_empty() {
                    return Err(HandlerError::Failed(format!("No process named '{}'", name)));
                }
                matches
            }
            (None, None) => {
                return Err(HandlerError::InvalidParameters(
                    "kill requires a pid or a name".to_string(),
                ))
            }
        };

        if targets.contains(&own_pid) {
            return Err(HandlerError::Failed(
                "Refusing to terminate the agent's own process".to_string(),
            ));
        }

        let mut signalled = Vec::with_capacity(targets.len());
        for pid in targets {
            info!("Terminating pid {}", pid);
            match terminate(pid).await {
                Ok(()) => signalled.push(pid),
                Err(e) => warn!("Failed to terminate pid {}: {}", pid, e),
            }
        }

        if signalled.is_empty() {
            return Err(HandlerError::Failed(
                "No process could be signalled".to_string(),
            ));
        }

        Ok(RawOutcome::Signalled { pids: signalled })
    }
}

#[async_trait]
impl OperationHandler for ProcessHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ProcessOp
    }

    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError> {
        let Action::ProcessOp(params) = action else {
            return Err(HandlerError::InvalidParameters(format!(
                "process handler cannot run {}",
                action.kind()
            )));
        };

        match params.op {
            ProcessOperation::List => {
                let mut processes = list_processes().await?;
                processes.truncate(MAX_LISTED);
                Ok(RawOutcome::Data {
                    data: serde_json::to_value(processes)
                        .map_err(|e| HandlerError::Failed(e.to_string()))?,
                })
            }
            ProcessOperation::Find => {
                let needle = params.name.as_deref().unwrap_or("").to_lowercase();
                let found: Vec<ProcessInfo> = list_processes()
                    .await?
                    .into_iter()
                    .filter(|p| p.name.to_lowercase().contains(&needle))
                    .collect();
                Ok(RawOutcome::Data {
                    data: serde_json::to_value(found)
                        .map_err(|e| HandlerError::Failed(e.to_string()))?,
                })
            }
            ProcessOperation::Kill => self.kill(params).await,
        }
    }
}

/// Snapshot of the live process table, zombies excluded
#[cfg(unix)]
pub async fn list_processes() -> Result<Vec<ProcessInfo>, HandlerError> {
    let output = Command::new("ps")
        .args(["-axo", "pid=,stat=,comm="])
        .output()
        .await?;

    if !output.status.success() {
        return Err(HandlerError::Failed(format!(
            "ps failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(windows)]
pub async fn list_processes() -> Result<Vec<ProcessInfo>, HandlerError> {
    let output = Command::new("tasklist")
        .args(["/FO", "CSV", "/NH"])
        .output()
        .await?;

    if !output.status.success() {
        return Err(HandlerError::Failed("tasklist failed".to_string()));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split("\",\"").map(|f| f.trim_matches('"')).collect();
            let name = fields.first()?.to_string();
            let pid = fields.get(1)?.parse().ok()?;
            Some(ProcessInfo { pid, name })
        })
        .collect())
}

/// Parse `ps -o pid=,stat=,comm=` rows
pub fn parse_ps_output(text: &str) -> Vec<ProcessInfo> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid: u32 = parts.next()?.parse().ok()?;
            let stat = parts.next()?;
            if stat.starts_with('Z') {
                return None;
            }
            let command = parts.collect::<Vec<_>>().join(" ");
            if command.is_empty() {
                return None;
            }
            // macOS reports the full executable path
            let name = command.rsplit('/').next().unwrap_or(&command).to_string();
            Some(ProcessInfo { pid, name })
        })
        .collect()
}

/// Whether a process with this pid is running (zombies count as gone)
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => {}
        Err(_) => return false,
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next());
            if matches!(state, Some('Z') | Some('X')) {
                return false;
            }
        }
    }

    true
}

#[cfg(windows)]
pub fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

#[cfg(unix)]
async fn terminate(pid: u32) -> Result<(), HandlerError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| HandlerError::InvalidParameters(format!("pid out of range: {}", pid)))?;

    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| HandlerError::Failed(format!("kill({}) failed: {}", pid, e)))
}

#[cfg(windows)]
async fn terminate(pid: u32) -> Result<(), HandlerError> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(HandlerError::Failed(format!("taskkill failed for pid {}", pid)))
    }
}
