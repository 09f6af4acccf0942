//! Execution kernel
//!
//! Dispatches a validated [`Action`] to its registered handler, then checks the
//! claimed effect with [`Verifier`] before producing a [`TaskResult`]. The
//! kernel is the only place that constructs a verified result.
//!
//! Handler runs are raced against the goal's [`StopSignal`]; dropping the losing
//! future kills any child process the handler spawned.

pub mod verify;

pub use verify::{Verdict, Verifier};

use sdk::{Action, TaskResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::StopSignal;
use crate::config::ExecutionConfig;
use crate::tools::{HandlerRegistry, SystemProbe};

/// Error text for a run interrupted by the stop signal
pub const CANCELLED: &str = "cancelled: stop requested";

pub struct ExecutionKernel {
    registry: HandlerRegistry,
    verifier: Verifier,
    probe: Arc<dyn SystemProbe>,
}

impl ExecutionKernel {
    pub fn new(registry: HandlerRegistry, verifier: Verifier, probe: Arc<dyn SystemProbe>) -> Self {
        Self {
            registry,
            verifier,
            probe,
        }
    }

    /// Kernel with every built-in handler rooted at `workspace`
    pub fn with_defaults(
        workspace: PathBuf,
        execution: &ExecutionConfig,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        let registry =
            HandlerRegistry::with_defaults(workspace.clone(), execution, Arc::clone(&probe));
        let verifier = Verifier::new(workspace, execution);
        Self::new(registry, verifier, probe)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run `action` and return its canonical result. Never errors: every
    /// failure mode is a `failed` result. Relies on handlers upholding the
    /// no-panic contract of [`sdk::OperationHandler`].
    pub async fn execute(&self, action: &Action, stop: &StopSignal) -> TaskResult {
        let kind = action.kind();

        let Some(handler) = self.registry.get(kind) else {
            warn!("No handler registered for {}", kind);
            return TaskResult::failure(format!("no handler registered for action '{}'", kind))
                .with_execution_used(false);
        };

        if stop.is_stopped() {
            return TaskResult::failure(CANCELLED).with_execution_used(false);
        }

        info!("Executing {}", action);

        let run_and_verify = async {
            match handler.run(action).await {
                Ok(outcome) => {
                    let verdict = self.verifier.verify(action, &outcome).await;
                    Ok((outcome, verdict))
                }
                Err(e) => Err(e),
            }
        };

        let completed = tokio::select! {
            completed = run_and_verify => completed,
            _ = stop.stopped() => {
                warn!("Stop requested while {} was running", kind);
                return TaskResult::failure(CANCELLED).with_execution_used(true);
            }
        };

        let snapshot = match self.probe.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("Post-execution snapshot unavailable: {}", e);
                None
            }
        };

        match completed {
            Err(e) => {
                warn!("{} failed: {}", kind, e);
                TaskResult::failure(e.to_string())
                    .with_execution_used(true)
                    .with_system_state(snapshot)
            }
            Ok((outcome, Verdict::Refuted(reason))) => {
                warn!("{} post-condition failed: {}", kind, reason);
                TaskResult::failure(format!("post-condition failed: {}", reason))
                    .with_content(outcome.summary())
                    .with_execution_used(true)
                    .with_system_state(snapshot)
            }
            Ok((outcome, Verdict::Confirmed { confidence })) => {
                info!("{} verified (confidence {:.2})", kind, confidence);
                TaskResult::success(outcome.summary(), confidence, true, snapshot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::HostProbe;
    use async_trait::async_trait;
    use sdk::{ActionKind, HandlerError, OperationHandler, RawOutcome, TaskStatus};
    use serde_json::json;
    use std::time::Duration;

    struct SlowHandler;

    #[async_trait]
    impl OperationHandler for SlowHandler {
        fn kind(&self) -> ActionKind {
            ActionKind::SystemInfo
        }

        async fn run(&self, _action: &Action) -> Result<RawOutcome, HandlerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RawOutcome::Data {
                data: json!({"cpu_count": 1}),
            })
        }
    }

    struct BrokenHandler;

    #[async_trait]
    impl OperationHandler for BrokenHandler {
        fn kind(&self) -> ActionKind {
            ActionKind::SystemInfo
        }

        async fn run(&self, _action: &Action) -> Result<RawOutcome, HandlerError> {
            Err(HandlerError::Failed("sensor offline".into()))
        }
    }

    fn kernel_with(handler: Arc<dyn OperationHandler>, dir: &std::path::Path) -> ExecutionKernel {
        let mut registry = HandlerRegistry::empty();
        registry.register(handler);
        ExecutionKernel::new(
            registry,
            Verifier::new(dir.to_path_buf(), &ExecutionConfig::default()),
            Arc::new(HostProbe::new()),
        )
    }

    fn system_info() -> Action {
        Action::from_parts("system_info", &json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_missing_handler_not_executed() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = ExecutionKernel::new(
            HandlerRegistry::empty(),
            Verifier::new(dir.path().to_path_buf(), &ExecutionConfig::default()),
            Arc::new(HostProbe::new()),
        );
        let result = kernel.execute(&system_info(), &StopSignal::new()).await;
        assert!(result.is_failed());
        assert!(!result.execution_used());
        assert!(result.error().contains("system_info"));
    }

    #[tokio::test]
    async fn test_handler_error_is_failed_but_executed() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = kernel_with(Arc::new(BrokenHandler), dir.path());
        let result = kernel.execute(&system_info(), &StopSignal::new()).await;
        assert_eq!(result.status(), TaskStatus::Failed);
        assert!(result.execution_used());
        assert!(!result.verified());
        assert_eq!(result.error(), "sensor offline");
    }

    #[tokio::test]
    async fn test_stop_cancels_running_handler() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = kernel_with(Arc::new(SlowHandler), dir.path());
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.stop();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), kernel.execute(&system_info(), &stop))
            .await
            .unwrap();
        assert!(result.is_failed());
        assert_eq!(result.error(), CANCELLED);
        assert!(result.execution_used());
    }

    #[tokio::test]
    async fn test_stop_before_run_skips_handler() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = kernel_with(Arc::new(SlowHandler), dir.path());
        let stop = StopSignal::new();
        stop.stop();
        let result = kernel.execute(&system_info(), &stop).await;
        assert_eq!(result.error(), CANCELLED);
        assert!(!result.execution_used());
    }

    #[tokio::test]
    async fn test_system_info_verified() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = ExecutionKernel::with_defaults(
            dir.path().to_path_buf(),
            &ExecutionConfig::default(),
            Arc::new(HostProbe::new()),
        );
        let result = kernel.execute(&system_info(), &StopSignal::new()).await;
        assert_eq!(result.status(), TaskStatus::Success);
        assert!(result.verified());
        assert!(result.system_state().is_some());
    }
}
