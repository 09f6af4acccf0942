//! Planner and reflector inputs
//!
//! One explicit, serializable struct per call. The LLM-backed implementations
//! render them into a prompt; scripted implementations in tests inspect them
//! directly.

use sdk::TaskResult;
use serde::Serialize;
use serde_json::Value;

use crate::llm::Message;

/// Everything the planner is allowed to see
#[derive(Debug, Clone, Serialize)]
pub struct PlanningContext {
    pub goal: String,

    /// Serialized agent state (counters, plan, cursor, last result, snapshot)
    pub state: Value,

    pub short_term: Vec<Message>,

    pub long_term_summary: String,

    /// Actions the kernel can execute, with their parameter shapes
    pub capabilities: String,
}

impl PlanningContext {
    /// Prompt body sent as the user turn
    pub fn render(&self) -> String {
        let notes: Vec<String> = self
            .short_term
            .iter()
            .map(|m| format!("[{}] {}", m.role, m.content))
            .collect();

        format!(
            "Goal: {}\n\n--- Agent State ---\n{}\n\n--- Recent Context ---\n{}\n\n--- Previous Goals ---\n{}\n\n--- {}",
            self.goal,
            serde_json::to_string_pretty(&self.state).unwrap_or_else(|_| self.state.to_string()),
            if notes.is_empty() {
                "(none)".to_string()
            } else {
                notes.join("\n")
            },
            self.long_term_summary,
            self.capabilities,
        )
    }
}

/// Everything the reflector is allowed to see
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionContext {
    pub goal: String,

    /// The planned step as it was executed
    pub action: Value,

    pub result: TaskResult,

    pub state: Value,
}

impl ReflectionContext {
    pub fn render(&self) -> String {
        format!(
            "Goal: {}\n\nExecuted step:\n{}\n\nResult:\n{}\n\nAgent state:\n{}",
            self.goal,
            self.action,
            serde_json::to_string_pretty(&self.result).unwrap_or_else(|_| self.result.to_string()),
            self.state,
        )
    }
}
