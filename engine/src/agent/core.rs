//! Cognitive Control Loop
//!
//! Drives one goal through repeated iterations of
//!
//! 1. snapshot the environment
//! 2. plan (when there is no plan or the last step failed)
//! 3. select and validate the current step into a typed [`Action`]
//! 4. risk-gate it (block, ask for confirmation, or run automatically)
//! 5. execute and verify through the kernel
//! 6. record the step, reflect on it, update stagnation, advance
//!
//! Model output is untrusted throughout: a reply that does not match its schema
//! changes nothing except a context note and, for steps, the repair counter.
//!
//! # Termination
//!
//! - the goal is complete (reflector or completion marker)
//! - `max_iterations` iterations have run
//! - `max_repair_attempts` internal errors were caught
//! - the final iteration found no step to run
//! - the stop signal was raised

use sdk::{Action, TaskResult};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::confirmation::{ConfirmationChannel, Decision, DenyAll};
use super::events::{AuditSink, LoopEvent, LoopOutcome, Termination};
use super::state::{AgentState, PlanResponse, PlannedStep, Reflection};
use super::stop::StopSignal;
use super::working_memory::{ContextStore, WorkingMemory};
use crate::conductor::{Planner, PlanningContext, ReflectionContext, Reflector};
use crate::config::AgentConfig;
use crate::kernel::{ExecutionKernel, CANCELLED};
use crate::llm::{extract_json, MessageRole};
use crate::risk_engine::{RiskEngine, RiskReport};
use crate::tools::SystemProbe;

/// Characters of step output kept in a context note
const NOTE_CONTENT_CHARS: usize = 500;

/// Error text when the final iteration has nothing to run
pub const NO_PLAN: &str = "no valid plan remaining";

enum Flow {
    Continue,
    Finish(Termination, TaskResult),
}

/// Why a planning request produced no plan
enum PlanFailure {
    /// The planner itself failed (network, provider). Counts as an internal error.
    Transport(String),
    /// The planner answered, but not with a valid plan
    Schema(String),
}

pub struct CognitiveLoop {
    config: AgentConfig,
    planner: Arc<dyn Planner>,
    reflector: Arc<dyn Reflector>,
    risk: Arc<RiskEngine>,
    kernel: Arc<ExecutionKernel>,
    probe: Arc<dyn SystemProbe>,
    confirmation: Arc<dyn ConfirmationChannel>,
    memory: Box<dyn ContextStore>,
    events: Option<mpsc::UnboundedSender<LoopEvent>>,
    audit: Option<Arc<dyn AuditSink>>,
    stop: StopSignal,
}

impl CognitiveLoop {
    /// Loop that denies every confirmation, keeps in-process working memory,
    /// and reports nothing beyond its return value
    pub fn new(
        config: AgentConfig,
        planner: Arc<dyn Planner>,
        reflector: Arc<dyn Reflector>,
        risk: Arc<RiskEngine>,
        kernel: Arc<ExecutionKernel>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        let memory = WorkingMemory::with_limit(config.max_context_tokens);
        Self {
            config,
            planner,
            reflector,
            risk,
            kernel,
            probe,
            confirmation: Arc::new(DenyAll),
            memory: Box::new(memory),
            events: None,
            audit: None,
            stop: StopSignal::new(),
        }
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn ConfirmationChannel>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_memory(mut self, memory: Box<dyn ContextStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for stopping a running goal from another task
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn memory(&self) -> &dyn ContextStore {
        self.memory.as_ref()
    }

    /// Run one goal to termination
    pub async fn run(&mut self, goal: &str) -> LoopOutcome {
        let goal_id = Uuid::new_v4().to_string();
        let mut state = AgentState::new(goal);

        info!("Starting goal {}: {}", goal_id, goal);
        self.memory.clear_short_term();
        self.memory.set_goal(goal);

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.goal_started(&goal_id, goal).await {
                warn!("Audit trail unavailable for goal {}: {:#}", goal_id, e);
            }
        }
        self.emit(LoopEvent::GoalStarted {
            goal_id: goal_id.clone(),
            goal: goal.to_string(),
        });

        let mut replan = false;

        let (termination, result) = loop {
            if self.stop.is_stopped() {
                break (Termination::Stopped, TaskResult::failure(CANCELLED));
            }

            if state.repair_counter >= self.config.max_repair_attempts {
                let last = state.last_error.as_deref().unwrap_or("unknown error");
                break (
                    Termination::RepairLimit,
                    TaskResult::failure(format!(
                        "repair limit of {} reached; last error: {}",
                        self.config.max_repair_attempts, last
                    )),
                );
            }

            if state.iteration >= self.config.max_iterations {
                let mut message = format!(
                    "iteration limit of {} reached without completing the goal",
                    self.config.max_iterations
                );
                if let Some(last) = state.last_result.as_ref().filter(|r| r.is_failed()) {
                    message.push_str(&format!("; last error: {}", last.error()));
                }
                break (Termination::Exhausted, TaskResult::failure(message));
            }

            state.iteration += 1;

            match self.iterate(&goal_id, &mut state, &mut replan).await {
                Flow::Continue => {}
                Flow::Finish(termination, result) => break (termination, result),
            }
        };

        self.memory.add_episode(goal, &result);

        let outcome = LoopOutcome {
            goal_id,
            goal: goal.to_string(),
            iterations: state.iteration,
            step_graph: state.into_step_graph(),
            result,
            termination,
        };

        if termination == Termination::Completed {
            info!(
                "Goal {} completed after {} iteration(s)",
                outcome.goal_id, outcome.iterations
            );
        } else {
            error!(
                "Goal {} ended ({}) after {} iteration(s): {}",
                outcome.goal_id,
                termination,
                outcome.iterations,
                outcome.result.error()
            );
        }

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.goal_finished(&outcome).await {
                warn!("Failed to record outcome of goal {}: {:#}", outcome.goal_id, e);
            }
        }
        self.emit(LoopEvent::GoalFinished {
            status: outcome.result.status(),
            termination,
            iterations: outcome.iterations,
        });

        outcome
    }

    async fn iterate(&mut self, goal_id: &str, state: &mut AgentState, replan: &mut bool) -> Flow {
        info!(
            "Goal {} iteration {}/{}",
            goal_id, state.iteration, self.config.max_iterations
        );
        self.emit(LoopEvent::IterationStarted {
            iteration: state.iteration,
        });

        match self.probe.snapshot().await {
            Ok(snapshot) => state.environment_snapshot = Some(snapshot),
            Err(e) => debug!("Keeping previous environment snapshot: {}", e),
        }

        // Plan
        if *replan || state.current_plan().is_empty() {
            match self.request_plan(state).await {
                Ok(steps) => {
                    info!("Planner proposed {} step(s)", steps.len());
                    self.memory.add_short_term(
                        MessageRole::Assistant,
                        &format!("Planned {} step(s): {}", steps.len(), step_names(&steps)),
                    );
                    self.emit(LoopEvent::PlanAccepted { steps: steps.len() });
                    state.replace_plan(steps);
                    *replan = false;
                }
                Err(PlanFailure::Transport(reason)) => {
                    state.repair_counter += 1;
                    warn!(
                        "Planner failed (repair {}/{}): {}",
                        state.repair_counter, self.config.max_repair_attempts, reason
                    );
                    self.memory
                        .add_short_term(MessageRole::User, &format!("Planner failed: {}", reason));
                    self.emit(LoopEvent::PlanRejected {
                        reason: reason.clone(),
                    });
                    state.last_error = Some(reason);
                    state.clear_plan();
                    return Flow::Continue;
                }
                Err(PlanFailure::Schema(reason)) => {
                    warn!("Plan rejected: {}", reason);
                    self.memory
                        .add_short_term(MessageRole::User, &format!("Plan rejected: {}", reason));
                    self.emit(LoopEvent::PlanRejected { reason });
                    state.clear_plan();
                    return Flow::Continue;
                }
            }
        }

        // Select
        let step_index = state.current_step_index();
        let Some(raw_step) = state.current_step().cloned() else {
            state.clear_plan();
            self.emit(LoopEvent::PlanCleared {
                reason: NO_PLAN.to_string(),
            });
            if state.iteration >= self.config.max_iterations {
                return Flow::Finish(Termination::NoPlan, TaskResult::failure(NO_PLAN));
            }
            info!("No step to run; replanning");
            return Flow::Continue;
        };

        // Validate
        let (planned, action) = match validate_step(&raw_step) {
            Ok(validated) => validated,
            Err(reason) => {
                state.repair_counter += 1;
                warn!(
                    "Step {} rejected (repair {}/{}): {}",
                    step_index, state.repair_counter, self.config.max_repair_attempts, reason
                );
                self.memory.add_short_term(
                    MessageRole::User,
                    &format!("Step {} rejected: {}", step_index, reason),
                );
                self.emit(LoopEvent::StepRejected {
                    step_index,
                    reason: reason.clone(),
                });
                state.last_error = Some(reason);
                state.clear_plan();
                *replan = true;
                return Flow::Continue;
            }
        };
        let action_json = serde_json::to_value(&planned).unwrap_or(raw_step);

        // Risk gate
        let report = self.risk.assess_action(&action);
        info!(
            "Step {}: {} assessed {} (score {})",
            step_index, action, report.label, report.score
        );
        if planned.risk_level != report.label {
            debug!(
                "Planner estimated {} risk for {}, engine assessed {}",
                planned.risk_level, action, report.label
            );
        }
        self.emit(LoopEvent::RiskAssessed {
            action: action.to_string(),
            report: report.clone(),
        });

        if let Some(reason) = self.gate(&action, &report).await {
            warn!("Step {} cancelled: {}", step_index, reason);
            let error = if reason == CANCELLED {
                reason.clone()
            } else {
                format!("cancelled: {}", reason)
            };
            let result = TaskResult::failure(error)
                .with_risk_level(report.label)
                .with_execution_used(false);

            self.memory.add_short_term(
                MessageRole::User,
                &format!("Step {} ({}) cancelled: {}", step_index, action, reason),
            );
            self.memory.update_execution_state("last_action", &action.to_string());
            self.memory.update_execution_state("last_status", "cancelled");
            self.record(goal_id, state, step_index, action_json, result)
                .await;
            self.emit(LoopEvent::StepCancelled {
                action: action.to_string(),
                reason,
            });

            state.clear_plan();
            *replan = true;
            return Flow::Continue;
        }

        // Execute
        let result = self
            .kernel
            .execute(&action, &self.stop)
            .await
            .with_risk_level(report.label);

        info!(
            "Step {} finished: {} (verified={})",
            step_index,
            result.status(),
            result.verified()
        );
        self.memory.add_short_term(
            MessageRole::User,
            &format!("Step {} ({}) {}", step_index, action, describe_result(&result)),
        );
        self.memory.update_execution_state("last_action", &action.to_string());
        self.memory
            .update_execution_state("last_status", result.status().as_str());
        self.record(goal_id, state, step_index, action_json.clone(), result.clone())
            .await;

        if result.is_success() && result.verified() && self.matches_completion_marker(&result) {
            info!("Completion marker found in verified output");
            state.mark_complete();
        }

        // Reflect
        let plan_replaced = self.reflect(state, action_json, &result).await;

        // Stagnation
        if result.is_failed() {
            state.stagnation_counter += 1;
            if state.stagnation_counter >= self.config.stagnation_threshold {
                let reason = format!("{} consecutive failures", state.stagnation_counter);
                warn!("Stagnation: {}; clearing plan", reason);
                self.memory.add_short_term(
                    MessageRole::User,
                    &format!("Plan abandoned after {}", reason),
                );
                self.emit(LoopEvent::PlanCleared { reason });
                state.clear_plan();
            }
        } else {
            state.stagnation_counter = 0;
        }

        // Advance
        if result.is_success() && !state.is_complete() && !plan_replaced {
            state.advance();
        }
        *replan = result.is_failed() && !plan_replaced;

        if state.is_complete() {
            return Flow::Finish(Termination::Completed, result);
        }

        Flow::Continue
    }

    async fn request_plan(&self, state: &AgentState) -> Result<Vec<Value>, PlanFailure> {
        let context = PlanningContext {
            goal: state.goal().to_string(),
            state: state_value(state),
            short_term: self.memory.short_term(),
            long_term_summary: self.memory.long_term_summary(),
            capabilities: self.kernel.registry().capabilities_prompt(),
        };

        let reply = self
            .planner
            .plan(&context)
            .await
            .map_err(|e| PlanFailure::Transport(format!("{:#}", e)))?;

        parse_plan(&reply).map_err(PlanFailure::Schema)
    }

    /// `Some(reason)` when the step must not run
    async fn gate(&self, action: &Action, report: &RiskReport) -> Option<String> {
        if report.blocked {
            return Some(format!(
                "blocked by risk policy ({} risk, score {}, rules: {})",
                report.label,
                report.score,
                report.matched_rules.join(", ")
            ));
        }

        if report.is_auto() {
            return None;
        }

        info!("Awaiting confirmation for {} ({} risk)", action, report.label);
        self.emit(LoopEvent::AwaitingConfirmation {
            action: action.to_string(),
            label: report.label,
        });

        let decision = tokio::select! {
            decision = self.confirmation.confirm(action, report) => decision,
            _ = self.stop.stopped() => return Some(CANCELLED.to_string()),
        };

        match decision {
            Decision::Approved => None,
            Decision::Denied => Some("denied by user".to_string()),
            Decision::NoResponse => Some("no confirmation received".to_string()),
        }
    }

    /// Returns whether the reflector replaced the plan
    async fn reflect(&mut self, state: &mut AgentState, action: Value, result: &TaskResult) -> bool {
        let context = ReflectionContext {
            goal: state.goal().to_string(),
            action,
            result: result.clone(),
            state: state_value(state),
        };

        let reply = match self.reflector.reflect(&context).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Reflector failed, continuing without reflection: {:#}", e);
                return false;
            }
        };

        let reflection = match parse_reflection(&reply) {
            Ok(reflection) => reflection,
            Err(reason) => {
                warn!("Ignoring reflection: {}", reason);
                return false;
            }
        };

        let is_complete = reflection.is_complete == Some(true);
        if is_complete {
            state.mark_complete();
        }

        let mut plan_replaced = false;
        if let Some(repair_plan) = reflection.repair_plan.filter(|plan| !plan.is_empty()) {
            info!("Reflector replaced the plan with {} step(s)", repair_plan.len());
            state.replace_plan(repair_plan);
            plan_replaced = true;
        }

        self.memory.add_short_term(
            MessageRole::Assistant,
            &format!("Reflection [{}]: {}", reflection.status, reflection.reflection),
        );
        self.emit(LoopEvent::Reflected {
            status: reflection.status,
            reflection: reflection.reflection,
            is_complete,
            plan_replaced,
        });

        plan_replaced
    }

    async fn record(
        &self,
        goal_id: &str,
        state: &mut AgentState,
        step_index: usize,
        action: Value,
        result: TaskResult,
    ) {
        let record = state.record(step_index, action, result).clone();

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.step_recorded(goal_id, &record).await {
                warn!("Failed to persist step {} of goal {}: {:#}", step_index, goal_id, e);
            }
        }
        self.emit(LoopEvent::StepExecuted { record });
    }

    fn matches_completion_marker(&self, result: &TaskResult) -> bool {
        let content = result.content().to_lowercase();
        self.config
            .completion_markers
            .iter()
            .filter(|marker| !marker.is_empty())
            .any(|marker| content.contains(&marker.to_lowercase()))
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(events) = &self.events {
            // A closed receiver only means nobody is watching
            let _ = events.send(event);
        }
    }
}

/// Parse a planner reply into raw steps
pub fn parse_plan(reply: &str) -> Result<Vec<Value>, String> {
    let value = extract_json(reply).ok_or_else(|| "planner reply contains no JSON".to_string())?;
    let plan: PlanResponse = serde_json::from_value(value)
        .map_err(|e| format!("planner reply does not match the plan schema: {}", e))?;
    Ok(plan.next_steps)
}

/// Parse a reflector reply
pub fn parse_reflection(reply: &str) -> Result<Reflection, String> {
    let value =
        extract_json(reply).ok_or_else(|| "reflector reply contains no JSON".to_string())?;
    serde_json::from_value(value)
        .map_err(|e| format!("reflector reply does not match the reflection schema: {}", e))
}

/// Validate one raw plan step into a typed action
pub fn validate_step(raw: &Value) -> Result<(PlannedStep, Action), String> {
    let planned: PlannedStep = serde_json::from_value(raw.clone())
        .map_err(|e| format!("malformed step: {}", e))?;
    let action = planned.to_action().map_err(|e| e.to_string())?;
    Ok((planned, action))
}

fn state_value(state: &AgentState) -> Value {
    serde_json::to_value(state).unwrap_or(Value::Null)
}

fn step_names(steps: &[Value]) -> String {
    let names: Vec<&str> = steps
        .iter()
        .map(|s| s.get("action").and_then(Value::as_str).unwrap_or("?"))
        .collect();
    names.join(", ")
}

fn describe_result(result: &TaskResult) -> String {
    if result.is_failed() {
        return format!("failed: {}", result.error());
    }
    let content: String = result.content().chars().take(NOTE_CONTENT_CHARS).collect();
    format!(
        "{} (verified={}): {}",
        result.status(),
        result.verified(),
        content
    )
}
