//! System introspection
//!
//! [`SystemProbe`] is the seam the control loop and kernel use to capture the
//! environment. [`HostProbe`] reads procfs on Linux and falls back to what the
//! standard library exposes elsewhere.

use async_trait::async_trait;
use sdk::{Action, ActionKind, HandlerError, OperationHandler, RawOutcome, SystemSnapshot};
use std::sync::Arc;

#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn snapshot(&self) -> Result<SystemSnapshot, HandlerError>;
}

/// Probe for the machine the engine runs on
#[derive(Debug, Default)]
pub struct HostProbe;

impl HostProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SystemProbe for HostProbe {
    async fn snapshot(&self) -> Result<SystemSnapshot, HandlerError> {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .map_err(|e| HandlerError::Failed(format!("cannot determine CPU count: {}", e)))?;

        let (memory_total_kb, memory_available_kb) = read_meminfo().await;

        Ok(SystemSnapshot {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: read_hostname().await,
            cpu_count,
            load_average: read_loadavg().await,
            memory_total_kb,
            memory_available_kb,
            uptime_secs: read_uptime().await,
            captured_at: chrono::Utc::now().timestamp(),
        })
    }
}

async fn read_hostname() -> Option<String> {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return Some(name.trim().to_string());
            }
        }
    }

    if let Ok(name) = tokio::fs::read_to_string("/etc/hostname").await {
        let name = name.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    let output = tokio::process::Command::new("hostname").output().await.ok()?;
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty()).then_some(name)
}

async fn read_loadavg() -> Option<[f64; 3]> {
    let text = tokio::fs::read_to_string("/proc/loadavg").await.ok()?;
    parse_loadavg(&text)
}

async fn read_meminfo() -> (Option<u64>, Option<u64>) {
    match tokio::fs::read_to_string("/proc/meminfo").await {
        Ok(text) => parse_meminfo(&text),
        Err(_) => (None, None),
    }
}

async fn read_uptime() -> Option<u64> {
    let text = tokio::fs::read_to_string("/proc/uptime").await.ok()?;
    let secs: f64 = text.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

pub fn parse_loadavg(text: &str) -> Option<[f64; 3]> {
    let mut fields = text.split_whitespace().map(|f| f.parse::<f64>());
    let one = fields.next()?.ok()?;
    let five = fields.next()?.ok()?;
    let fifteen = fields.next()?.ok()?;
    Some([one, five, fifteen])
}

/// `(MemTotal, MemAvailable)` in kB
pub fn parse_meminfo(text: &str) -> (Option<u64>, Option<u64>) {
    let field = |key: &str| {
        text.lines()
            .find(|line| line.starts_with(key))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
    };
    (field("MemTotal:"), field("MemAvailable:"))
}

/// `system_info` handler
pub struct SystemInfoHandler {
    probe: Arc<dyn SystemProbe>,
}

impl SystemInfoHandler {
    pub fn new(probe: Arc<dyn SystemProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl OperationHandler for SystemInfoHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::SystemInfo
    }

    async fn run(&self, _action: &Action) -> Result<RawOutcome, HandlerError> {
        let snapshot = self.probe.snapshot().await?;
        let data =
            serde_json::to_value(snapshot).map_err(|e| HandlerError::Failed(e.to_string()))?;
        Ok(RawOutcome::Data { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(
            parse_loadavg("0.52 0.58 0.59 1/389 12345\n"),
            Some([0.52, 0.58, 0.59])
        );
        assert_eq!(parse_loadavg("garbage"), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:       16314156 kB\nMemFree:         1234 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(parse_meminfo(text), (Some(16314156), Some(8000000)));
    }

    #[tokio::test]
    async fn test_host_probe_reports_cpus() {
        let snapshot = HostProbe::new().snapshot().await.unwrap();
        assert!(snapshot.cpu_count > 0);
        assert_eq!(snapshot.os, std::env::consts::OS);
    }

    #[tokio::test]
    async fn test_system_info_outcome_is_structured() {
        let handler = SystemInfoHandler::new(Arc::new(HostProbe::new()));
        let action = Action::from_parts("system_info", &serde_json::json!({})).unwrap();
        let outcome = handler.run(&action).await.unwrap();
        let RawOutcome::Data { data } = outcome else {
            panic!("expected data outcome");
        };
        assert!(data["cpu_count"].as_u64().unwrap() > 0);
    }
}
