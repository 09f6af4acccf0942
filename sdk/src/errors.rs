//! Error types and handling
//!
//! This module provides the error types used throughout the Luna engine.
//! All errors implement the `LunaErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Hints are static strings. They never echo command text, parameters or
//! secrets back to the user.

use thiserror::Error;

/// Trait for Luna error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait LunaErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// A recoverable error may go away if the same goal is simply run again.
    /// A non-recoverable one needs the configuration or environment fixed first.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration, bad risk rules
/// - **Database**: Audit trail persistence failures
/// - **LLM Provider**: Provider setup and credential lookup
/// - **Goal termination**: Every way a goal can end other than `completed`
///
/// Per-step failures are not engine errors: they are `failed` task results
/// that the control loop reflects on and recovers from.
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, LunaErrorExt};
///
/// let error = EngineError::MaxIterationsExceeded(10);
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("bad threshold".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Goal termination
    #[error("Iteration limit of {0} reached without completing the goal")]
    MaxIterationsExceeded(u32),

    #[error("Repair limit exceeded: {0}")]
    RepairLimitExceeded(String),

    #[error("No valid plan remaining")]
    NoPlan,

    #[error("Goal cancelled")]
    Cancelled,
}

impl LunaErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Audit database operation failed. Check the data directory",
            Self::LLMProvider(_) => "LLM provider unavailable. Check your API key and network",
            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::MaxIterationsExceeded(_) => {
                "Goal too complex. Try breaking it into smaller steps"
            }
            Self::RepairLimitExceeded(_) => "The agent kept failing internally and gave up",
            Self::NoPlan => "The planner could not come up with a runnable step. Rephrase the goal",
            Self::Cancelled => "The goal was stopped before it finished",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Running the same command again cannot succeed until something is fixed
            Self::Config(_)
            | Self::Database(_)
            | Self::KeyringError(_)
            | Self::RepairLimitExceeded(_) => false,

            Self::LLMProvider(_)
            | Self::MaxIterationsExceeded(_)
            | Self::NoPlan
            | Self::Cancelled => true,
        }
    }
}
