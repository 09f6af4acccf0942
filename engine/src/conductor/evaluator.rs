//! Conductor Evaluator
//!
//! Asks the LLM to judge one executed step: whether the goal is now met and,
//! if not, whether the remaining plan should be replaced.

use crate::conductor::{ReflectionContext, Reflector};
use crate::llm::{LLMProvider, Message};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const REFLECTOR_PROMPT: &str = "You review the outcome of one step executed by an autonomous agent.\n\
Output ONLY a JSON object:\n\
{\"status\": \"<short verdict>\", \"reflection\": \"<one or two sentences>\", \"is_complete\": true|false, \"repair_plan\": [<steps>]}\n\n\
- Set is_complete to true only if the goal is fully achieved and the result is verified.\n\
- A result with status \"partial\" or verified=false does not prove anything happened.\n\
- Provide repair_plan (same step format as the planner) only when the current plan must change; omit it otherwise.\n\
No markdown, no explanation.";

pub struct LlmReflector {
    llm: Arc<dyn LLMProvider>,
}

impl LlmReflector {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Reflector for LlmReflector {
    async fn reflect(&self, context: &ReflectionContext) -> Result<String> {
        let messages = [
            Message::system(REFLECTOR_PROMPT),
            Message::user(context.render()),
        ];

        let reply = self
            .llm
            .complete(&messages)
            .await
            .with_context(|| format!("Reflector call to {} failed", self.llm.name()))?;

        debug!("Reflector reply: {}", reply);
        Ok(reply)
    }
}
