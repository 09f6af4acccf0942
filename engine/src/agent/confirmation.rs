//! Human-in-the-loop confirmation
//!
//! The loop suspends on [`ConfirmationChannel::confirm`] whenever a step needs
//! approval. Anything other than an explicit approval cancels the step.

use async_trait::async_trait;
use sdk::Action;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::risk_engine::RiskReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Denied,
    /// Nobody answered (closed channel or timeout). Treated as a denial.
    NoResponse,
}

impl Decision {
    pub fn is_approved(self) -> bool {
        self == Decision::Approved
    }
}

#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    async fn confirm(&self, action: &Action, report: &RiskReport) -> Decision;
}

/// Refuses everything. The safe default for unattended runs.
#[derive(Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl ConfirmationChannel for DenyAll {
    async fn confirm(&self, _action: &Action, _report: &RiskReport) -> Decision {
        Decision::Denied
    }
}

/// Approves everything the risk engine did not block
#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationChannel for AutoApprove {
    async fn confirm(&self, action: &Action, report: &RiskReport) -> Decision {
        debug!("Auto-approving {} ({})", action, report.label);
        Decision::Approved
    }
}

/// A pending approval handed to whoever answers it
#[derive(Debug)]
pub struct ConfirmationRequest {
    pub action: Action,
    pub report: RiskReport,
    reply: oneshot::Sender<bool>,
}

impl ConfirmationRequest {
    pub fn approve(self) {
        let _ = self.reply.send(true);
    }

    pub fn deny(self) {
        let _ = self.reply.send(false);
    }

    pub fn respond(self, approved: bool) {
        let _ = self.reply.send(approved);
    }
}

/// Suspends on a request sent over `mpsc` and resumes on the `oneshot` reply
pub struct ChannelConfirmation {
    tx: mpsc::Sender<ConfirmationRequest>,
    timeout: Option<Duration>,
}

impl ChannelConfirmation {
    /// `timeout_secs == 0` waits indefinitely
    pub fn new(timeout_secs: u64) -> (Self, mpsc::Receiver<ConfirmationRequest>) {
        let (tx, rx) = mpsc::channel(1);
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        (Self { tx, timeout }, rx)
    }
}

#[async_trait]
impl ConfirmationChannel for ChannelConfirmation {
    async fn confirm(&self, action: &Action, report: &RiskReport) -> Decision {
        let (reply, answer) = oneshot::channel();
        let request = ConfirmationRequest {
            action: action.clone(),
            report: report.clone(),
            reply,
        };

        if self.tx.send(request).await.is_err() {
            warn!("Confirmation channel closed; treating as no response");
            return Decision::NoResponse;
        }

        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, answer).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!("No confirmation within {}s", limit.as_secs());
                    return Decision::NoResponse;
                }
            },
            None => answer.await,
        };

        match answer {
            Ok(true) => Decision::Approved,
            Ok(false) => Decision::Denied,
            Err(_) => Decision::NoResponse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk_engine::RiskEngine;
    use serde_json::json;

    fn pending() -> (Action, RiskReport) {
        let params = json!({"command": "rm -rf ./build"});
        let action = Action::from_parts("command", &params).unwrap();
        let report = RiskEngine::with_defaults().unwrap().assess("command", &params);
        (action, report)
    }

    #[tokio::test]
    async fn test_deny_all() {
        let (action, report) = pending();
        assert_eq!(DenyAll.confirm(&action, &report).await, Decision::Denied);
    }

    #[tokio::test]
    async fn test_channel_approve() {
        let (channel, mut rx) = ChannelConfirmation::new(5);
        tokio::spawn(async move {
            if let Some(request) = rx.recv().await {
                request.approve();
            }
        });
        let (action, report) = pending();
        assert_eq!(channel.confirm(&action, &report).await, Decision::Approved);
    }

    #[tokio::test]
    async fn test_channel_dropped_request_is_no_response() {
        let (channel, mut rx) = ChannelConfirmation::new(0);
        tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        let (action, report) = pending();
        assert_eq!(channel.confirm(&action, &report).await, Decision::NoResponse);
    }

    #[tokio::test]
    async fn test_channel_timeout() {
        let (channel, mut rx) = ChannelConfirmation::new(1);
        let holder = tokio::spawn(async move {
            let request = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(3)).await;
            drop(request);
        });
        let (action, report) = pending();
        assert_eq!(channel.confirm(&action, &report).await, Decision::NoResponse);
        holder.abort();
    }
}
