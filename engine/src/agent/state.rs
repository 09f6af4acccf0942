//! Per-goal agent state and the model-facing plan/reflection schemas

use sdk::{Action, ActionSchemaError, RiskLevel, SystemSnapshot, TaskResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step as proposed by the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannedStep {
    pub action: String,

    pub parameters: serde_json::Map<String, Value>,

    #[serde(default)]
    pub thought: String,

    /// The planner's own estimate. Informational only: gating uses the risk engine.
    #[serde(default)]
    pub risk_level: RiskLevel,
}

impl PlannedStep {
    pub fn new(action: impl Into<String>, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            action: action.into(),
            parameters,
            thought: String::new(),
            risk_level: RiskLevel::Low,
        }
    }

    pub fn parameters_value(&self) -> Value {
        Value::Object(self.parameters.clone())
    }

    /// Validate into a typed action
    pub fn to_action(&self) -> Result<Action, ActionSchemaError> {
        Action::from_parts(&self.action, &self.parameters_value())
    }
}

/// Planner reply: `{"next_steps": [...]}`
///
/// Steps stay raw here so that one malformed step does not reject the whole plan;
/// each is validated when it is reached.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanResponse {
    pub next_steps: Vec<Value>,
}

/// Reflector reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reflection {
    pub status: String,

    pub reflection: String,

    #[serde(default)]
    pub is_complete: Option<bool>,

    #[serde(default)]
    pub repair_plan: Option<Vec<Value>>,
}

/// Audit row: what ran at which point and what came of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub iteration: u32,
    pub step_index: usize,
    pub action: Value,
    pub result: TaskResult,
}

/// Mutable state of one goal. Owned by the loop.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    goal: String,
    pub iteration: u32,
    pub stagnation_counter: u32,
    pub repair_counter: u32,
    /// Kept out of model context; reported through the audit trail instead
    #[serde(skip_serializing)]
    step_graph: Vec<StepRecord>,
    current_plan: Vec<Value>,
    current_step_index: usize,
    is_complete: bool,
    pub last_action: Option<Value>,
    pub last_result: Option<TaskResult>,
    pub last_error: Option<String>,
    pub environment_snapshot: Option<SystemSnapshot>,
}

impl AgentState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            iteration: 0,
            stagnation_counter: 0,
            repair_counter: 0,
            step_graph: Vec::new(),
            current_plan: Vec::new(),
            current_step_index: 0,
            is_complete: false,
            last_action: None,
            last_result: None,
            last_error: None,
            environment_snapshot: None,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn step_graph(&self) -> &[StepRecord] {
        &self.step_graph
    }

    pub fn into_step_graph(self) -> Vec<StepRecord> {
        self.step_graph
    }

    pub fn current_plan(&self) -> &[Value] {
        &self.current_plan
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Set once; there is no way back
    pub fn mark_complete(&mut self) {
        self.is_complete = true;
    }

    /// Replace the plan wholesale and rewind the cursor
    pub fn replace_plan(&mut self, steps: Vec<Value>) {
        self.current_plan = steps;
        self.current_step_index = 0;
    }

    pub fn clear_plan(&mut self) {
        self.replace_plan(Vec::new());
    }

    pub fn current_step(&self) -> Option<&Value> {
        self.current_plan.get(self.current_step_index)
    }

    /// Move to the next step. Never past the end of the plan.
    pub fn advance(&mut self) {
        if self.current_step_index < self.current_plan.len() {
            self.current_step_index += 1;
        }
    }

    pub fn record(&mut self, step_index: usize, action: Value, result: TaskResult) -> &StepRecord {
        self.last_action = Some(action.clone());
        self.last_result = Some(result.clone());
        self.step_graph.push(StepRecord {
            iteration: self.iteration,
            step_index,
            action,
            result,
        });
        let last = self.step_graph.len() - 1;
        &self.step_graph[last]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_planned_step_defaults() {
        let step: PlannedStep =
            serde_json::from_value(json!({"action": "system_info", "parameters": {}})).unwrap();
        assert_eq!(step.thought, "");
        assert_eq!(step.risk_level, RiskLevel::Low);
        assert!(step.to_action().is_ok());
    }

    #[test]
    fn test_planned_step_requires_parameters() {
        assert!(serde_json::from_value::<PlannedStep>(json!({"action": "system_info"})).is_err());
        assert!(serde_json::from_value::<PlannedStep>(
            json!({"action": "command", "parameters": "ls"})
        )
        .is_err());
    }

    #[test]
    fn test_plan_response_requires_next_steps() {
        assert!(serde_json::from_value::<PlanResponse>(json!({"steps": []})).is_err());
        let plan: PlanResponse =
            serde_json::from_value(json!({"next_steps": [{"action": "x"}, 3]})).unwrap();
        assert_eq!(plan.next_steps.len(), 2);
    }

    #[test]
    fn test_reflection_optional_fields() {
        let r: Reflection =
            serde_json::from_value(json!({"status": "ok", "reflection": "fine"})).unwrap();
        assert_eq!(r.is_complete, None);
        assert_eq!(r.repair_plan, None);
        assert!(serde_json::from_value::<Reflection>(json!({"status": "ok"})).is_err());
    }

    #[test]
    fn test_replace_plan_resets_index() {
        let mut state = AgentState::new("goal");
        state.replace_plan(vec![json!(1), json!(2)]);
        state.advance();
        assert_eq!(state.current_step_index(), 1);

        state.replace_plan(vec![json!(3)]);
        assert_eq!(state.current_step_index(), 0);
    }

    #[test]
    fn test_advance_never_passes_plan_end() {
        let mut state = AgentState::new("goal");
        state.replace_plan(vec![json!(1)]);
        state.advance();
        state.advance();
        assert_eq!(state.current_step_index(), 1);
        assert!(state.current_step().is_none());
    }

    #[test]
    fn test_record_appends_and_caches() {
        let mut state = AgentState::new("goal");
        state.iteration = 2;
        state.record(0, json!({"action": "system_info"}), TaskResult::failure("x"));
        assert_eq!(state.step_graph().len(), 1);
        assert_eq!(state.step_graph()[0].iteration, 2);
        assert!(state.last_result.as_ref().unwrap().is_failed());
    }
}
