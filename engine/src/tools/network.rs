//! Network probe handler: ping, TCP port check, interface listing

use async_trait::async_trait;
use sdk::action::NetworkOperation;
use sdk::{Action, ActionKind, HandlerError, OperationHandler, RawOutcome};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::command_executor::CommandRunner;

#[derive(Debug)]
pub struct NetworkHandler {
    runner: CommandRunner,
    probe_timeout: Duration,
}

impl NetworkHandler {
    pub fn new(runner: CommandRunner, probe_timeout: Duration) -> Self {
        Self {
            runner,
            probe_timeout,
        }
    }
}

#[async_trait]
impl OperationHandler for NetworkHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::NetworkOp
    }

    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError> {
        let Action::NetworkOp(params) = action else {
            return Err(HandlerError::InvalidParameters(format!(
                "network handler cannot run {}",
                action.kind()
            )));
        };

        match params.op {
            NetworkOperation::Ping => {
                info!("Pinging {}", params.host);
                let output = self
                    .runner
                    .run_program("ping", &ping_args(&params.host), None, None)
                    .await?;
                Ok(RawOutcome::Exited {
                    code: output.code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            NetworkOperation::CheckPort => {
                let open = probe_port(&params.host, params.port, self.probe_timeout).await;
                info!(
                    "Port {} on {} is {}",
                    params.port,
                    params.host,
                    if open { "open" } else { "closed" }
                );
                Ok(RawOutcome::Data {
                    data: json!({"host": params.host, "port": params.port, "open": open}),
                })
            }
            NetworkOperation::ListInterfaces => {
                let interfaces = list_interfaces().await?;
                Ok(RawOutcome::Data {
                    data: json!(interfaces),
                })
            }
        }
    }
}

fn ping_args(host: &str) -> Vec<String> {
    let count = if cfg!(windows) { "-n" } else { "-c" };
    vec![count.to_string(), "1".to_string(), host.to_string()]
}

/// Attempt a TCP connection; `true` when it is accepted within the timeout
pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("Connect to {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => false,
    }
}

/// Names of the host's network interfaces
pub async fn list_interfaces() -> Result<Vec<String>, HandlerError> {
    if let Ok(mut entries) = tokio::fs::read_dir("/sys/class/net").await {
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        return Ok(names);
    }

    let output = if cfg!(windows) {
        tokio::process::Command::new("netsh")
            .args(["interface", "show", "interface"])
            .output()
            .await?
    } else {
        tokio::process::Command::new("ifconfig")
            .arg("-l")
            .output()
            .await?
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let names = if cfg!(windows) {
        // Admin State  State  Type  Interface Name
        text.lines()
            .skip(3)
            .filter_map(|line| {
                let cols: Vec<&str> = line.split_whitespace().collect();
                (cols.len() >= 4).then(|| cols[3..].join(" "))
            })
            .collect()
    } else {
        text.split_whitespace().map(str::to_string).collect()
    };
    Ok(names)
}
