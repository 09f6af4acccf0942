//! Configuration management
//!
//! This module handles loading, validation, and management of the Luna configuration.
//! Configuration is stored in TOML format at ~/.luna/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace path, log level, data directory
//! - **llm**: OpenAI-compatible endpoint used by the planner and reflector
//! - **agent**: Control loop limits (iterations, repairs, stagnation)
//! - **risk**: Detector rules, thresholds, whitelist
//! - **execution**: Handler timeouts and verification retry windows
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the workspace path, creating it if needed
//! - Creates the data directory if it doesn't exist
//!
//! # Examples
//!
//! ```no_run
//! use luna_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Workspace: {:?}", config.core.workspace);
//! println!("Model: {}", config.llm.model);
//! # Ok(())
//! # }
//! ```

use crate::risk_engine::{default_rules, DetectorRule, RiskEngine, RiskThresholds, WhitelistEntry};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM endpoint configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Control loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Risk policy
    #[serde(default)]
    pub risk: RiskConfig,

    /// Handler settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Default working directory for commands and relative file paths (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path, holds luna.db (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// OpenAI-compatible chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key.
    // Note: falls back to the OS keychain (service "luna"); the key itself is never stored here
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
            temperature: default_temperature(),
        }
    }
}

/// Control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on loop iterations per goal
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Internal errors tolerated before the goal is aborted
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,

    /// Consecutive failures that force a fresh plan
    #[serde(default = "default_stagnation_threshold")]
    pub stagnation_threshold: u32,

    /// Seconds to wait for a confirmation decision; 0 waits indefinitely
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Substrings that mark a verified success as goal completion
    #[serde(default)]
    pub completion_markers: Vec<String>,

    /// Token budget for short-term context
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_repair_attempts: default_max_repair_attempts(),
            stagnation_threshold: default_stagnation_threshold(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            completion_markers: Vec::new(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

/// Risk policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Ask before running medium-risk actions
    #[serde(default)]
    pub medium_requires_confirmation: bool,

    #[serde(default)]
    pub thresholds: RiskThresholds,

    /// Exact signatures allowed to run (with confirmation) despite a dangerous score
    #[serde(default)]
    pub whitelist: Vec<WhitelistEntry>,

    /// Detector rules; the shipped defaults apply when omitted
    #[serde(default = "default_rules")]
    pub rules: Vec<DetectorRule>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            medium_requires_confirmation: false,
            thresholds: RiskThresholds::default(),
            whitelist: Vec::new(),
            rules: default_rules(),
        }
    }
}

/// Handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Process-table checks after an app launch
    #[serde(default = "default_launch_verify_attempts")]
    pub launch_verify_attempts: u32,

    /// Base backoff between launch checks; doubles each attempt
    #[serde(default = "default_launch_verify_backoff")]
    pub launch_verify_backoff_ms: u64,

    /// Timeout for TCP port probes
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Re-checks that a killed process is gone
    #[serde(default = "default_kill_verify_attempts")]
    pub kill_verify_attempts: u32,

    #[serde(default = "default_script_interpreter")]
    pub script_interpreter: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            launch_verify_attempts: default_launch_verify_attempts(),
            launch_verify_backoff_ms: default_launch_verify_backoff(),
            probe_timeout_ms: default_probe_timeout(),
            kill_verify_attempts: default_kill_verify_attempts(),
            script_interpreter: default_script_interpreter(),
        }
    }
}

// Default value functions
fn default_workspace() -> PathBuf {
    PathBuf::from("~/.luna/workspace")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.luna")
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_repair_attempts() -> u32 {
    3
}

fn default_stagnation_threshold() -> u32 {
    3
}

fn default_confirmation_timeout() -> u64 {
    60
}

fn default_max_context_tokens() -> usize {
    4000
}

fn default_command_timeout() -> u64 {
    60
}

fn default_launch_verify_attempts() -> u32 {
    5
}

fn default_launch_verify_backoff() -> u64 {
    200
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_kill_verify_attempts() -> u32 {
    5
}

fn default_script_interpreter() -> String {
    "python3".to_string()
}

impl Config {
    /// Load configuration from the default location (~/.luna/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (bad log level, thresholds, limits or rule patterns)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Write the unexpanded form so the file stays portable
        let config = Self::default();
        let toml_string = config.to_toml()?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Serialize to pretty TOML
    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Get the default configuration file path (~/.luna/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".luna").join("config.toml"))
    }

    /// Path of the audit database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("luna.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and loop limits
    /// - Compiles the risk rules once to surface bad patterns early
    /// - Expands ~ in paths
    /// - Canonicalizes the workspace, creating it if needed
    /// - Creates the data directory if needed
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.agent.max_iterations == 0 {
            return Err(EngineError::Config(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.agent.max_repair_attempts == 0 {
            return Err(EngineError::Config(
                "agent.max_repair_attempts must be at least 1".to_string(),
            ));
        }
        if self.agent.stagnation_threshold == 0 {
            return Err(EngineError::Config(
                "agent.stagnation_threshold must be at least 1".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.execution.script_interpreter.trim().is_empty() {
            return Err(EngineError::Config(
                "execution.script_interpreter must not be empty".to_string(),
            ));
        }

        // Thresholds and patterns
        RiskEngine::from_config(&self.risk)?;

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub(crate) fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize().map_err(|e| {
        EngineError::Config(format!("Failed to canonicalize {:?}: {}", path, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.max_repair_attempts, 3);
        assert_eq!(config.agent.stagnation_threshold, 3);
        assert!(config.agent.completion_markers.is_empty());
        assert_eq!(config.risk.thresholds.dangerous, 100);
        assert!(!config.risk.medium_requires_confirmation);
        assert!(!config.risk.rules.is_empty());
        assert_eq!(config.execution.script_interpreter, "python3");
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_expand_path_tilde_only() {
        let path = PathBuf::from("~");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = config.to_toml().unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.risk.rules, deserialized.risk.rules);
        assert_eq!(config.llm.model, deserialized.llm.model);
    }

    #[test]
    fn test_omitted_sections_use_defaults() {
        let config: Config = toml::from_str("[agent]\nmax_iterations = 4\n").unwrap();
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.stagnation_threshold, 3);
        assert_eq!(config.risk.rules, default_rules());
    }
}
