//! Conductor Planner
//!
//! Asks the LLM for the next steps towards a goal given the current agent state.

use crate::conductor::{PlanningContext, Planner};
use crate::llm::{LLMProvider, Message};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const PLANNER_PROMPT: &str = "You are the planner of an autonomous operating-system agent. \
Decide the next concrete steps that move the agent towards the user's goal.\n\
Output ONLY a JSON object of the form:\n\
{\"next_steps\": [{\"action\": \"<action name>\", \"parameters\": {...}, \"thought\": \"why\", \"risk_level\": \"low|medium|high|dangerous\"}]}\n\n\
Rules:\n\
- Use only the actions listed under Available actions, with exactly the parameters shown.\n\
- Prefer the smallest number of steps. Never repeat a step that already succeeded.\n\
- If the previous step failed, read its error and plan around it.\n\
- Return {\"next_steps\": []} when nothing more can be done.\n\
No markdown, no explanation.";

pub struct LlmPlanner {
    llm: Arc<dyn LLMProvider>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, context: &PlanningContext) -> Result<String> {
        let messages = [Message::system(PLANNER_PROMPT), Message::user(context.render())];

        let reply = self
            .llm
            .complete(&messages)
            .await
            .with_context(|| format!("Planner call to {} failed", self.llm.name()))?;

        debug!("Planner reply: {}", reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMError;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<Message>>,
        reply: Option<String>,
    }

    #[async_trait]
    impl LLMProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, messages: &[Message]) -> crate::llm::Result<String> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            self.reply.clone().ok_or(LLMError::Timeout)
        }
    }

    fn context() -> PlanningContext {
        PlanningContext {
            goal: "report system stats".into(),
            state: json!({"iteration": 1}),
            short_term: vec![],
            long_term_summary: "No previous goals.".into(),
            capabilities: "Available actions:\n\n## system_info".into(),
        }
    }

    #[tokio::test]
    async fn test_plan_sends_system_and_context() {
        let llm = Arc::new(Recording {
            seen: Mutex::new(vec![]),
            reply: Some(r#"{"next_steps": []}"#.into()),
        });
        let planner = LlmPlanner::new(llm.clone());

        let reply = planner.plan(&context()).await.unwrap();
        assert_eq!(reply, r#"{"next_steps": []}"#);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].content.contains("next_steps"));
        assert!(seen[1].content.contains("report system stats"));
    }

    #[tokio::test]
    async fn test_plan_transport_error_propagates() {
        let planner = LlmPlanner::new(Arc::new(Recording {
            seen: Mutex::new(vec![]),
            reply: None,
        }));
        let err = planner.plan(&context()).await.unwrap_err();
        assert!(err.to_string().contains("recording"));
    }
}
