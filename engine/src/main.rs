// UniHelp academic assistant
// Main entry point for the unihelp binary

use clap::Parser;
use unihelp_engine::cli::{Cli, Command};
use unihelp_engine::config::Config;
use unihelp_engine::handlers::{
    handle_ask, handle_chat, handle_doctor, handle_models, handle_serve, OutputFormat,
};
use unihelp_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    if let Some(backend) = cli.backend {
        config.override_backend(backend, |key| std::env::var(key).ok());
    }
    if let Some(level) = &cli.log {
        config.core.log_level = level.to_ascii_lowercase();
        config.validate_and_process()?;
    }

    // RUST_LOG still wins over the configured level
    init_telemetry_with_level(&config.core.log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("UniHelp v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Chat => {
            tracing::info!("Starting chat session...");
            handle_chat(&config, format).await
        }

        Command::Ask { question } => {
            tracing::info!("Answering one-shot question");
            handle_ask(question, &config, format).await
        }

        Command::Models => {
            tracing::info!("Listing models for {}", config.llm.backend);
            handle_models(&config, format).await
        }

        Command::Serve { bind } => {
            tracing::info!("Starting API server...");
            handle_serve(bind, &config).await
        }

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
