//! Troupe CLI entry point.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use troupe::cli::{commands, Cli, Commands, ConfigAction};
use troupe::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => Settings::expand_path(path),
        None => Settings::default_config_path(),
    };
    let creating = matches!(cli.command, Commands::Config { action: ConfigAction::Init { .. } });
    let settings = if creating && !config_path.exists() {
        Settings::default()
    } else {
        Settings::load_from(cli.config.as_ref().map(|_| &config_path))?
    };

    // -v flags win over the configured level
    let log_level = match cli.verbose {
        0 => settings.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("troupe={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    std::fs::create_dir_all(settings.data_dir())?;

    match cli.command {
        Commands::Serve { host, port } => {
            commands::run_serve(host, port, settings).await?;
        }

        Commands::Chat { target, session, user, no_stream } => {
            commands::run_chat(target, session, user, no_stream, settings).await?;
        }

        Commands::Run { message, target, session, user, json } => {
            commands::run_once(&message, target, session, user, json, settings).await?;
        }

        Commands::Sessions { action } => {
            commands::run_sessions(&action, &settings)?;
        }

        Commands::Knowledge { action } => {
            commands::run_knowledge(&action, &settings)?;
        }

        Commands::Eval { action } => {
            commands::run_eval(&action, settings).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&config_path, &settings)?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, &config_path, settings)?;
        }
    }

    Ok(())
}
