//! Luna Engine Library
//!
//! Core of the Luna task agent: the cognitive control loop, the risk engine,
//! the execution kernel and everything they lean on. Used by the `luna`
//! binary and by the integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Rule-based risk classification
pub mod risk_engine;

/// Shell command execution
pub mod command_executor;

/// Built-in operation handlers
pub mod tools;

/// Execution kernel with post-condition verification
pub mod kernel;

/// Cognitive control loop
pub mod agent;

/// Planner and reflector prompts over an LLM
pub mod conductor;

/// LLM provider abstraction layer
pub mod llm;

/// Database persistence module
pub mod db;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
