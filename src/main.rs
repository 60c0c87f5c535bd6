//! Palaver - streaming chat sessions over local models
//!
#![doc = "Palaver - streaming chat sessions over local models"]
#![doc = "Main entry point for the palaver binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use palaver::cli::{Cli, Commands};
use palaver::commands;
use palaver::config::Config;
use palaver::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);
    telemetry::init_metrics_exporter();

    // Load and validate configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting HTTP backend");
            commands::serve::run_serve(config).await?;
        }
        Commands::Chat { resume, .. } => {
            if let Some(id) = &resume {
                tracing::debug!("Resuming session: {}", id);
            }
            commands::chat::run_chat(config, resume).await?;
        }
        Commands::Sessions { command } => {
            commands::sessions::handle_sessions(&config, command).await?;
        }
        Commands::Models { json } => {
            commands::models::list_models(&config, json).await?;
        }
    }

    Ok(())
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let default = if verbose { "palaver=debug" } else { "palaver=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
