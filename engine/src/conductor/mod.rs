//! Conductor System
//!
//! The model-facing side of the control loop. A [`Planner`] proposes the next
//! steps for a goal; a [`Reflector`] judges the outcome of one step. Both return
//! raw text: parsing and schema enforcement belong to the loop, so a misbehaving
//! model can never put an unvalidated value into agent state.

pub mod context;
pub mod evaluator;
pub mod planner;

pub use context::{PlanningContext, ReflectionContext};
pub use evaluator::LlmReflector;
pub use planner::LlmPlanner;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Planner: Send + Sync {
    /// Raw reply expected to contain `{"next_steps": [...]}`
    async fn plan(&self, context: &PlanningContext) -> Result<String>;
}

#[async_trait]
pub trait Reflector: Send + Sync {
    /// Raw reply expected to contain `{"status", "reflection", "is_complete"?, "repair_plan"?}`
    async fn reflect(&self, context: &ReflectionContext) -> Result<String>;
}
