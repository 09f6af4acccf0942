//! What the loop reports to the outside world
//!
//! [`LoopEvent`]s are a read-only presentation stream; the [`AuditSink`] is the
//! durable record. Neither can influence the loop: a dropped receiver or a
//! failing sink is logged and ignored.

use anyhow::Result;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::{RiskLevel, TaskResult, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::StepRecord;
use crate::risk_engine::RiskReport;

/// Why a goal stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The reflector or a completion marker declared the goal done
    Completed,
    /// `max_iterations` reached
    Exhausted,
    /// `max_repair_attempts` internal errors
    RepairLimit,
    /// The final iteration found no step to run
    NoPlan,
    /// The stop signal was raised
    Stopped,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Completed => "completed",
            Termination::Exhausted => "exhausted",
            Termination::RepairLimit => "repair_limit",
            Termination::NoPlan => "no_plan",
            Termination::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final report of one goal
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub goal_id: String,
    pub goal: String,
    pub result: TaskResult,
    pub step_graph: Vec<StepRecord>,
    pub iterations: u32,
    pub termination: Termination,
}

impl LoopOutcome {
    /// The error a caller should surface, or `None` for a completed goal
    pub fn error(&self) -> Option<EngineError> {
        match self.termination {
            Termination::Completed => None,
            Termination::Exhausted => Some(EngineError::MaxIterationsExceeded(self.iterations)),
            Termination::RepairLimit => Some(EngineError::RepairLimitExceeded(
                self.result.error().to_string(),
            )),
            Termination::NoPlan => Some(EngineError::NoPlan),
            Termination::Stopped => Some(EngineError::Cancelled),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    GoalStarted {
        goal_id: String,
        goal: String,
    },
    IterationStarted {
        iteration: u32,
    },
    PlanAccepted {
        steps: usize,
    },
    PlanRejected {
        reason: String,
    },
    StepRejected {
        step_index: usize,
        reason: String,
    },
    RiskAssessed {
        action: String,
        report: RiskReport,
    },
    AwaitingConfirmation {
        action: String,
        label: RiskLevel,
    },
    StepCancelled {
        action: String,
        reason: String,
    },
    StepExecuted {
        record: StepRecord,
    },
    Reflected {
        status: String,
        reflection: String,
        is_complete: bool,
        plan_replaced: bool,
    },
    PlanCleared {
        reason: String,
    },
    GoalFinished {
        status: TaskStatus,
        termination: Termination,
        iterations: u32,
    },
}

/// Durable record of goals and their step graphs
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn goal_started(&self, goal_id: &str, goal: &str) -> Result<()>;

    async fn step_recorded(&self, goal_id: &str, record: &StepRecord) -> Result<()>;

    async fn goal_finished(&self, outcome: &LoopOutcome) -> Result<()>;
}
