/// Goal and step-graph persistence
///
/// Each goal gets one row in `goals`; every executed or cancelled step becomes
/// one row in `step_records` holding the planned step and its `TaskResult` as JSON.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::TaskResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::agent::{AuditSink, LoopOutcome, StepRecord};

/// Goal row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalRecord {
    pub id: String,
    pub goal: String,
    /// `running` until finished, then the final task status
    pub status: String,
    pub termination: Option<String>,
    pub iterations: i64,
    pub final_error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Step row as read back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredStep {
    pub id: i64,
    pub goal_id: String,
    pub iteration: u32,
    pub step_index: usize,
    pub action: Value,
    pub result: TaskResult,
    pub created_at: i64,
}

pub struct StepRepository {
    pool: SqlitePool,
}

fn now() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

fn goal_from_row(r: &SqliteRow) -> GoalRecord {
    GoalRecord {
        id: r.get("id"),
        goal: r.get("goal"),
        status: r.get("status"),
        termination: r.get("termination"),
        iterations: r.get("iterations"),
        final_error: r.get("final_error"),
        created_at: r.get("created_at"),
        completed_at: r.get("completed_at"),
    }
}

impl StepRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_goal(&self, id: &str, goal: &str) -> Result<GoalRecord> {
        let created_at = now()?;

        sqlx::query("INSERT INTO goals (id, goal, status, created_at) VALUES (?, ?, 'running', ?)")
            .bind(id)
            .bind(goal)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .context("Failed to create goal")?;

        Ok(GoalRecord {
            id: id.to_string(),
            goal: goal.to_string(),
            status: "running".to_string(),
            termination: None,
            iterations: 0,
            final_error: None,
            created_at,
            completed_at: None,
        })
    }

    pub async fn record_step(&self, goal_id: &str, record: &StepRecord) -> Result<i64> {
        let action = serde_json::to_string(&record.action).context("Failed to serialize step")?;
        let result =
            serde_json::to_string(&record.result).context("Failed to serialize step result")?;

        let inserted = sqlx::query(
            "INSERT INTO step_records (goal_id, iteration, step_index, action, result, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(goal_id)
        .bind(record.iteration as i64)
        .bind(record.step_index as i64)
        .bind(action)
        .bind(result)
        .bind(now()?)
        .execute(&self.pool)
        .await
        .context("Failed to record step")?;

        Ok(inserted.last_insert_rowid())
    }

    pub async fn finish_goal(&self, outcome: &LoopOutcome) -> Result<()> {
        let error = outcome.result.error();
        let final_error = (!error.is_empty()).then_some(error);

        sqlx::query(
            "UPDATE goals SET status = ?, termination = ?, iterations = ?, final_error = ?, completed_at = ? WHERE id = ?",
        )
        .bind(outcome.result.status().as_str())
        .bind(outcome.termination.as_str())
        .bind(outcome.iterations as i64)
        .bind(final_error)
        .bind(now()?)
        .bind(&outcome.goal_id)
        .execute(&self.pool)
        .await
        .context("Failed to finish goal")?;

        Ok(())
    }

    pub async fn get_goal(&self, goal_id: &str) -> Result<Option<GoalRecord>> {
        let row = sqlx::query(
            "SELECT id, goal, status, termination, iterations, final_error, created_at, completed_at FROM goals WHERE id = ?",
        )
        .bind(goal_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch goal")?;

        Ok(row.as_ref().map(goal_from_row))
    }

    /// Most recent goals first
    pub async fn list_goals(&self, limit: i64) -> Result<Vec<GoalRecord>> {
        let rows = sqlx::query(
            "SELECT id, goal, status, termination, iterations, final_error, created_at, completed_at FROM goals ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent goals")?;

        Ok(rows.iter().map(goal_from_row).collect())
    }

    /// Step graph of a goal in recording order
    pub async fn get_steps(&self, goal_id: &str) -> Result<Vec<StoredStep>> {
        let rows = sqlx::query(
            "SELECT id, goal_id, iteration, step_index, action, result, created_at FROM step_records WHERE goal_id = ? ORDER BY id ASC",
        )
        .bind(goal_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch steps")?;

        rows.into_iter()
            .map(|r| {
                let id: i64 = r.get("id");
                let action: String = r.get("action");
                let result: String = r.get("result");
                Ok(StoredStep {
                    id,
                    goal_id: r.get("goal_id"),
                    iteration: r.get::<i64, _>("iteration") as u32,
                    step_index: r.get::<i64, _>("step_index") as usize,
                    action: serde_json::from_str(&action)
                        .with_context(|| format!("Corrupt action in step {}", id))?,
                    result: serde_json::from_str(&result)
                        .with_context(|| format!("Corrupt result in step {}", id))?,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditSink for StepRepository {
    async fn goal_started(&self, goal_id: &str, goal: &str) -> Result<()> {
        self.create_goal(goal_id, goal).await.map(|_| ())
    }

    async fn step_recorded(&self, goal_id: &str, record: &StepRecord) -> Result<()> {
        self.record_step(goal_id, record).await.map(|_| ())
    }

    async fn goal_finished(&self, outcome: &LoopOutcome) -> Result<()> {
        self.finish_goal(outcome).await
    }
}
