//! Command handlers for CLI operations
//!
//! - run: drive a goal through the control loop
//! - assess: classify an action without running it
//! - history: show the last N goals
//! - replay: show the step graph of a goal
//! - config: show the effective configuration or its path

use anyhow::{Context, Result};
use sdk::errors::EngineError;
use sdk::{Action, TaskResult};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::{
    AuditSink, AutoApprove, ChannelConfirmation, CognitiveLoop, ConfirmationChannel,
    ConfirmationRequest, LoopEvent, LoopOutcome, StopSignal, Termination,
};
use crate::conductor::{LlmPlanner, LlmReflector};
use crate::config::Config;
use crate::db::Database;
use crate::kernel::ExecutionKernel;
use crate::llm::{LLMProvider, OpenAIProvider};
use crate::risk_engine::RiskEngine;
use crate::tools::{HostProbe, SystemProbe};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run one goal to termination
///
/// Steps that need confirmation are put to the user on stdin unless `yes` is
/// set. Ctrl-C raises the stop signal; a running step is cancelled and the goal
/// ends as `stopped`.
pub async fn handle_run(
    goal: String,
    yes: bool,
    no_persist: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let llm: Arc<dyn LLMProvider> = Arc::new(
        OpenAIProvider::from_config(config.llm.clone()).context("Failed to set up LLM provider")?,
    );
    let risk = Arc::new(RiskEngine::from_config(&config.risk)?);
    let probe: Arc<dyn SystemProbe> = Arc::new(HostProbe::new());
    let kernel = Arc::new(ExecutionKernel::with_defaults(
        config.core.workspace.clone(),
        &config.execution,
        Arc::clone(&probe),
    ));

    let confirmation: Arc<dyn ConfirmationChannel> = if yes {
        Arc::new(AutoApprove)
    } else {
        let (channel, requests) = ChannelConfirmation::new(config.agent.confirmation_timeout_secs);
        tokio::spawn(answer_from_stdin(requests));
        Arc::new(channel)
    };

    let stop = StopSignal::new();
    let on_interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping...");
            on_interrupt.stop();
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx, format));

    let mut agent = CognitiveLoop::new(
        config.agent.clone(),
        Arc::new(LlmPlanner::new(Arc::clone(&llm))),
        Arc::new(LlmReflector::new(llm)),
        risk,
        kernel,
        probe,
    )
    .with_confirmation(confirmation)
    .with_events(events_tx)
    .with_stop_signal(stop);

    let database = if no_persist {
        None
    } else {
        match open_database(config).await {
            Ok(db) => Some(db),
            Err(e) => {
                warn!("Audit trail disabled: {:#}", e);
                None
            }
        }
    };
    if let Some(db) = &database {
        let audit: Arc<dyn AuditSink> = Arc::new(db.steps());
        agent = agent.with_audit(audit);
    }

    info!("Running goal: {}", goal);
    let outcome = agent.run(&goal).await;

    // Dropping the loop closes the event stream
    drop(agent);
    printer.await.ok();

    if let Some(db) = database {
        db.close().await?;
    }

    print_outcome(&outcome, format)?;

    match outcome.error() {
        None => Ok(()),
        Some(error) => Err(error.into()),
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .map_err(|e| EngineError::Database(format!("{:#}", e)).into())
}

async fn answer_from_stdin(mut requests: mpsc::Receiver<ConfirmationRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(request) = requests.recv().await {
        eprintln!();
        eprintln!(
            "Confirmation required: {} ({} risk, score {})",
            request.action, request.report.label, request.report.score
        );
        if !request.report.matched_rules.is_empty() {
            eprintln!("  Matched: {}", request.report.matched_rules.join(", "));
        }
        eprint!("Approve? [y/N] ");

        let approved = match lines.next_line().await {
            Ok(Some(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        };
        request.respond(approved);
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<LoopEvent>, format: OutputFormat) {
    while let Some(event) = events.recv().await {
        match format {
            OutputFormat::Json => {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
            OutputFormat::Text => match event {
                LoopEvent::IterationStarted { iteration } => println!("── iteration {}", iteration),
                LoopEvent::PlanAccepted { steps } => println!("  planned {} step(s)", steps),
                LoopEvent::PlanRejected { reason } => println!("  plan rejected: {}", reason),
                LoopEvent::StepRejected { reason, .. } => println!("  step rejected: {}", reason),
                LoopEvent::RiskAssessed { action, report } => {
                    println!("  {} [{} risk, score {}]", action, report.label, report.score)
                }
                LoopEvent::StepCancelled { reason, .. } => println!("  ✗ cancelled: {}", reason),
                LoopEvent::StepExecuted { record } => {
                    println!("  → {}", result_line(&record.result))
                }
                LoopEvent::Reflected { reflection, .. } => println!("  reflection: {}", reflection),
                LoopEvent::PlanCleared { reason } => println!("  plan cleared: {}", reason),
                _ => {}
            },
        }
    }
}

fn result_line(result: &TaskResult) -> String {
    if result.is_failed() {
        format!("failed: {}", result.error())
    } else {
        format!(
            "{} (verified={}, confidence {:.2})",
            result.status(),
            result.verified(),
            result.confidence()
        )
    }
}

fn print_outcome(outcome: &LoopOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            if outcome.termination == Termination::Completed {
                println!("✓ Goal completed");
            } else {
                println!("✗ Goal ended: {}", outcome.termination);
            }
            println!("  Goal ID: {}", outcome.goal_id);
            println!("  Iterations: {}", outcome.iterations);
            println!("  Steps: {}", outcome.step_graph.len());
            println!("  Result: {}", result_line(&outcome.result));
            if !outcome.result.content().trim().is_empty() {
                println!();
                println!("{}", outcome.result.content().trim_end());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
    }
    Ok(())
}

/// Classify an action with the configured rules
pub fn handle_assess(
    action: String,
    params: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let parameters: Value =
        serde_json::from_str(&params).context("--params must be a JSON object")?;
    let engine = RiskEngine::from_config(&config.risk)?;
    // A valid action is scored in canonical form, exactly as the loop would
    let (report, schema) = match Action::from_parts(&action, &parameters) {
        Ok(typed) => (engine.assess_action(&typed), None),
        Err(e) => (engine.assess(&action, &parameters), Some(e)),
    };

    match format {
        OutputFormat::Text => {
            let policy = if report.blocked {
                "blocked"
            } else if report.is_auto() {
                "automatic"
            } else {
                "requires confirmation"
            };
            println!("Risk: {} (score {})", report.label, report.score);
            println!("Policy: {}", policy);
            if report.whitelisted {
                println!("Whitelisted: yes");
            }
            if report.matched_rules.is_empty() {
                println!("Matched rules: none");
            } else {
                println!("Matched rules: {}", report.matched_rules.join(", "));
            }
            if let Some(e) = &schema {
                println!("Schema: invalid ({})", e);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "action": action,
                "parameters": parameters,
                "report": report,
                "schema_error": schema.map(|e| e.to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show the most recent goals
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;

    let goals = database
        .steps()
        .list_goals(limit as i64)
        .await
        .context("Failed to fetch goal history")?;

    match format {
        OutputFormat::Text => {
            if goals.is_empty() {
                println!("No goals in history");
            } else {
                println!("Goal History (last {} goals):", limit);
                println!();
            }

            for goal in &goals {
                println!("Goal ID: {}", goal.id);
                println!("  Goal: {}", goal.goal);
                println!("  Status: {}", goal.status);
                if let Some(termination) = &goal.termination {
                    println!("  Termination: {}", termination);
                }
                println!("  Iterations: {}", goal.iterations);
                if let Some(error) = &goal.final_error {
                    println!("  Error: {}", error);
                }

                let created = chrono::DateTime::from_timestamp(goal.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                println!("  Created: {}", created);
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "goals": goals,
                "count": goals.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// Show a goal and its step graph
pub async fn handle_replay(goal_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let repo = database.steps();

    let goal = repo
        .get_goal(&goal_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Goal not found: {}", goal_id))?;
    let steps = repo.get_steps(&goal_id).await?;

    match format {
        OutputFormat::Text => {
            println!("Goal Replay: {}", goal_id);
            println!();
            println!("Goal: {}", goal.goal);
            println!("Status: {}", goal.status);
            if let Some(termination) = &goal.termination {
                println!("Termination: {}", termination);
            }
            println!();
            println!("Steps ({} total):", steps.len());
            println!();

            for step in &steps {
                let action = step
                    .action
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                println!(
                    "Iteration {} / step {}: {} {}",
                    step.iteration,
                    step.step_index,
                    action,
                    step.action.get("parameters").cloned().unwrap_or(Value::Null)
                );
                println!("  {}", result_line(&step.result));
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "goal": goal,
                "steps": steps,
                "step_count": steps.len()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", config.to_toml()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => println!("{}", json!({ "path": path })),
    }
    Ok(())
}
