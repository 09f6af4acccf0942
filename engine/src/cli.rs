//! CLI interface for Luna
//!
//! Command-line surface built with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Luna autonomous task agent
///
/// Turns a natural-language goal into risk-gated, verified system actions.
#[derive(Parser, Debug)]
#[command(name = "luna")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a goal through the control loop
    Run {
        /// The goal, in plain language
        goal: String,

        /// Approve every step that needs confirmation
        #[arg(short, long)]
        yes: bool,

        /// Do not write the audit trail
        #[arg(long)]
        no_persist: bool,
    },

    /// Classify an action without running it
    Assess {
        /// Action name (command, file_op, git_op, ...)
        action: String,

        /// Action parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Show recent goals
    History {
        /// Number of goals to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the step graph of a goal
    Replay {
        /// Goal ID to replay
        goal_id: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["luna", "history"]);
        assert!(matches!(cli.command, Command::History { limit: 10 }));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["luna", "--json", "--log", "debug", "config", "path"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["luna", "history", "--json", "--config", "/tmp/c.toml"]);
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["luna", "run", "report system stats", "--yes"]);
        if let Command::Run {
            goal,
            yes,
            no_persist,
        } = cli.command
        {
            assert_eq!(goal, "report system stats");
            assert!(yes);
            assert!(!no_persist);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_assess_command() {
        let cli = Cli::parse_from([
            "luna",
            "assess",
            "command",
            "--params",
            r#"{"command": "rm -rf /"}"#,
        ]);
        if let Command::Assess { action, params } = cli.command {
            assert_eq!(action, "command");
            assert!(params.contains("rm -rf"));
        } else {
            panic!("Expected Assess command");
        }
    }

    #[test]
    fn test_assess_default_params() {
        let cli = Cli::parse_from(["luna", "assess", "system_info"]);
        assert!(matches!(cli.command, Command::Assess { ref params, .. } if params == "{}"));
    }

    #[test]
    fn test_replay_and_config() {
        let cli = Cli::parse_from(["luna", "replay", "abc"]);
        assert!(matches!(cli.command, Command::Replay { ref goal_id } if goal_id == "abc"));

        let cli = Cli::parse_from(["luna", "config", "show"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }
}
