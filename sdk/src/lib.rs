//! Luna SDK
//!
//! Shared library providing the contract types used across the Luna engine and
//! any external operation handler: the canonical task result, the typed action
//! schema, the handler trait, and the engine error type.

/// Typed action schema
pub mod action;

/// Error types and handling
pub mod errors;

/// Operation handler trait and raw outcomes
pub mod handler;

/// Task result protocol and shared value types
pub mod types;

// Re-export commonly used types
pub use action::{Action, ActionKind, ActionSchemaError};
pub use errors::{EngineError, LunaErrorExt};
pub use handler::{HandlerError, OperationHandler, RawOutcome};
pub use types::{RiskLevel, SystemSnapshot, TaskResult, TaskStatus};
