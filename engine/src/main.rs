// Luna task agent
// Main entry point for the luna binary

use clap::Parser;
use luna_engine::cli::{Cli, Command, ConfigAction};
use luna_engine::config::Config;
use luna_engine::handlers::{
    handle_assess, handle_config_path, handle_config_show, handle_history, handle_replay,
    handle_run, OutputFormat,
};
use luna_engine::telemetry::init_telemetry_with_level;
use sdk::errors::{EngineError, LunaErrorExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let loaded = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::load_or_create(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Hint: {}", e.user_hint());
            return Err(e.into());
        }
    };

    // --log beats the config file; RUST_LOG beats both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Luna Engine v{} ({} - {})", version, commit, timestamp);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let result = match cli.command {
        Command::Run {
            goal,
            yes,
            no_persist,
        } => {
            tracing::info!("Executing goal: {}", goal);
            handle_run(goal, yes, no_persist, &config, format).await
        }

        Command::Assess { action, params } => {
            tracing::debug!("Assessing action: {}", action);
            handle_assess(action, params, &config, format)
        }

        Command::History { limit } => {
            tracing::info!("Showing last {} goals", limit);
            handle_history(limit, &config, format).await
        }

        Command::Replay { goal_id } => {
            tracing::info!("Replaying goal: {}", goal_id);
            handle_replay(goal_id, &config, format).await
        }

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => {
                let path = match cli.config {
                    Some(path) => path,
                    None => Config::default_config_path()?,
                };
                handle_config_path(&path, format)
            }
        },
    };

    if let Some(error) = result.as_ref().err().and_then(|e| e.downcast_ref::<EngineError>()) {
        eprintln!("Hint: {}", error.user_hint());
        if error.is_recoverable() {
            eprintln!("Running the goal again may succeed.");
        }
    }

    result
}
