//! Agent Loop
//!
//! The cognitive control loop that turns a natural-language goal into a sequence
//! of risk-gated, verified actions, together with the state it owns and the
//! seams it talks through (confirmation, memory, events, audit, stop signal).

pub mod confirmation;
pub mod core;
pub mod events;
pub mod state;
pub mod stop;
pub mod working_memory;

pub use confirmation::{
    AutoApprove, ChannelConfirmation, ConfirmationChannel, ConfirmationRequest, Decision, DenyAll,
};
pub use core::{parse_plan, parse_reflection, validate_step, CognitiveLoop, NO_PLAN};
pub use events::{AuditSink, LoopEvent, LoopOutcome, Termination};
pub use state::{AgentState, PlanResponse, PlannedStep, Reflection, StepRecord};
pub use stop::StopSignal;
pub use working_memory::{ContextStore, WorkingMemory};
