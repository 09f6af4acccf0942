//! Operation handler contract
//!
//! Handlers perform the side effect and report what happened as a [`RawOutcome`].
//! They never decide whether the action succeeded: the execution kernel turns a
//! raw outcome into a [`crate::TaskResult`] only after its own post-condition check.

use crate::action::{Action, ActionKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// What a handler observed while performing an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawOutcome {
    /// A child process ran to completion
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// Plain text output (file contents, listings)
    Text { text: String },

    /// Structured output (system stats, process tables, interfaces)
    Data { data: Value },

    /// A detached process was started
    Spawned { pid: u32, program: String },

    /// Signals were delivered to these processes
    Signalled { pids: Vec<u32> },
}

impl RawOutcome {
    /// Human-readable content carried into the task result
    pub fn summary(&self) -> String {
        match self {
            RawOutcome::Exited { stdout, stderr, .. } => {
                if stdout.trim().is_empty() {
                    stderr.clone()
                } else {
                    stdout.clone()
                }
            }
            RawOutcome::Text { text } => text.clone(),
            RawOutcome::Data { data } => {
                serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
            }
            RawOutcome::Spawned { pid, program } => format!("Started {} (pid {})", program, pid),
            RawOutcome::Signalled { pids } => {
                let list: Vec<String> = pids.iter().map(u32::to_string).collect();
                format!("Sent termination signal to pid(s) {}", list.join(", "))
            }
        }
    }
}

/// Handler failure. Always surfaces as a `failed` task result.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A capability that can perform one kind of action
///
/// # Panics
///
/// Implementations must not panic. Every failure, including an unexpected
/// one, is reported as a [`HandlerError`] so the control loop can record it
/// and keep going. The engine does not catch unwinding handlers, and release
/// builds abort on panic.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use sdk::{Action, ActionKind, HandlerError, OperationHandler, RawOutcome};
///
/// struct Echo;
///
/// #[async_trait]
/// impl OperationHandler for Echo {
///     fn kind(&self) -> ActionKind {
///         ActionKind::SystemInfo
///     }
///
///     async fn run(&self, _action: &Action) -> Result<RawOutcome, HandlerError> {
///         Ok(RawOutcome::Text { text: "ok".into() })
///     }
/// }
/// ```
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// The action kind this handler serves
    fn kind(&self) -> ActionKind;

    /// Perform the action. Errors, never panics.
    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError>;
}
