//! CLI interface for UniHelp
//!
//! Command-line interface built with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Backend;

/// UniHelp academic assistant
///
/// Answers student questions from a local knowledge base using either a
/// local Ollama model or the Gemini API.
#[derive(Parser, Debug)]
#[command(name = "unihelp")]
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

    /// Override the configured backend (ollama, gemini)
    #[arg(long, global = true, value_name = "BACKEND", value_parser = parse_backend)]
    pub backend: Option<Backend>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an interactive conversation
    Chat,

    /// Ask a single question and print the answer
    Ask {
        /// The question to ask
        question: String,
    },

    /// List chat-capable models of the selected backend
    Models,

    /// Run the JSON API server
    Serve {
        /// Socket address to bind (default: server.bind from config)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Check configuration, knowledge file, credentials and backend
    Doctor,
}

fn parse_backend(s: &str) -> Result<Backend, String> {
    s.parse().map_err(|e: sdk::errors::EngineError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_ask_with_global_flags() {
        let cli = Cli::try_parse_from([
            "unihelp",
            "--json",
            "ask",
            "What is osmosis?",
            "--backend",
            "gemini",
        ])
        .unwrap();

        assert!(cli.json);
        assert_eq!(cli.backend, Some(Backend::Gemini));
        match cli.command {
            Command::Ask { question } => assert_eq!(question, "What is osmosis?"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["unihelp", "--backend", "gpt", "chat"]).is_err());
    }

    #[test]
    fn test_serve_bind_override() {
        let cli = Cli::try_parse_from(["unihelp", "serve", "--bind", "0.0.0.0:8080"]).unwrap();
        match cli.command {
            Command::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:8080")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
