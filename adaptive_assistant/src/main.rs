//! Main entry point for the Adaptive Assistant CLI.

use adaptive_assistant::{cli, settings::Settings, telemetry, Orchestrator};
use anyhow::Result;
use clap::Parser;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::Cli::parse();

    // Load settings
    let settings = Settings::load(args.config.as_deref())?;

    // Execute the requested command; printing the configuration needs no
    // logging or learning state.
    match args.command {
        cli::Commands::Config => cli::print_config(&settings),
        command => {
            // Initialize telemetry
            telemetry::init(&settings.logging)?;

            let orchestrator = Orchestrator::from_settings(&settings)?;
            let result = cli::execute(command, &settings, &orchestrator).await;

            if let Err(e) = orchestrator.flush().await {
                warn!("Failed to flush learning state on exit: {}", e);
            }
            result
        }
    }
}
