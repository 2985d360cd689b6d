//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat: Interactive conversation
//! - ask: One-shot question
//! - models: List chat-capable models
//! - serve: Run the JSON API
//! - doctor: Validate configuration and check the backend

use anyhow::{Context, Result};
use serde_json::json;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::{Backend, Config};
use crate::conversation::Conversation;
use crate::display::Typewriter;
use crate::driver::{ConversationDriver, TurnOutcome};
use crate::knowledge;
use crate::llm::{self, MessageRole};
use crate::secrets;
use crate::server::{self, AppState, SessionStore};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// REPL commands recognised in chat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatCommand {
    Clear,
    Exit,
    History,
}

impl ChatCommand {
    fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "/clear" => Some(ChatCommand::Clear),
            "/exit" | "/quit" => Some(ChatCommand::Exit),
            "/history" => Some(ChatCommand::History),
            _ => None,
        }
    }
}

/// Run an interactive conversation on stdin/stdout
///
/// Ctrl-C while a reply is pending cancels that turn; at the prompt it ends
/// the session.
pub async fn handle_chat(config: &Config, format: OutputFormat) -> Result<()> {
    let driver = ConversationDriver::from_config(config)?;
    let mut conversation = driver.new_conversation();
    let typewriter = Typewriter::from_millis(config.chat.typing_delay_ms);

    if let OutputFormat::Text = format {
        println!(
            "{} ({} / {}). Type /clear to start over, /history to review, /exit to quit.",
            config.chat.assistant_name,
            driver.provider().name(),
            driver.provider().model()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if let OutputFormat::Text = format {
            print!("\nYou: ");
            std::io::stdout().flush()?;
        }

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match ChatCommand::parse(&line) {
            Some(ChatCommand::Exit) => break,
            Some(ChatCommand::Clear) => {
                driver.clear_conversation(&mut conversation);
                if let OutputFormat::Text = format {
                    println!("Conversation cleared.");
                }
                continue;
            }
            Some(ChatCommand::History) => {
                print_history(&conversation, &config.chat.assistant_name, format)?;
                continue;
            }
            None if line.trim().is_empty() => continue,
            None => {}
        }

        match format {
            OutputFormat::Text => {
                print!("{}: ", config.chat.assistant_name);
                std::io::stdout().flush()?;
                run_displayed_turn(&driver, &mut conversation, &line, typewriter).await?;
            }
            OutputFormat::Json => {
                let outcome = driver.submit_turn(&mut conversation, &line).await;
                println!("{}", serde_json::to_string(&turn_json(&line, &outcome, &driver))?);
            }
        }
    }

    tracing::info!("Chat session ended");
    Ok(())
}

/// Ask a single question and print the reply
pub async fn handle_ask(question: String, config: &Config, format: OutputFormat) -> Result<()> {
    let driver = ConversationDriver::from_config(config)?;
    let mut conversation = driver.new_conversation();

    match format {
        OutputFormat::Text => {
            let typewriter = Typewriter::from_millis(config.chat.typing_delay_ms);
            let outcome =
                run_displayed_turn(&driver, &mut conversation, &question, typewriter).await?;
            if let TurnOutcome::Ignored = outcome {
                anyhow::bail!("Question is empty");
            }
        }
        OutputFormat::Json => {
            let outcome = driver.submit_turn(&mut conversation, &question).await;
            if let TurnOutcome::Ignored = outcome {
                anyhow::bail!("Question is empty");
            }
            let output = turn_json(&question, &outcome, &driver);
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List the models the selected backend can chat with
pub async fn handle_models(config: &Config, format: OutputFormat) -> Result<()> {
    let provider = llm::build_provider(config)?;
    let models = provider.list_models().await.map_err(|e| {
        anyhow::anyhow!(
            "{} ({})",
            e.user_message(),
            secrets::scrub(&e.to_string())
        )
    })?;

    match format {
        OutputFormat::Text => {
            println!("Models available on {}:", provider.name());
            println!();
            if models.is_empty() {
                println!("  (none)");
            }
            for model in &models {
                let marker = if model.name == provider.model() { "*" } else { " " };
                match &model.display_name {
                    Some(display) => println!("{} {:<35} {}", marker, model.name, display),
                    None => println!("{} {}", marker, model.name),
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "backend": provider.name(),
                "configured": provider.model(),
                "models": models,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Run the JSON API until Ctrl-C
pub async fn handle_serve(bind: Option<String>, config: &Config) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;

    let driver = Arc::new(ConversationDriver::from_config(config)?);
    let sessions =
        SessionStore::with_limits(config.server.max_sessions, config.server.session_idle());

    server::serve(addr, AppState::with_store(driver, sessions), async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
        }
    })
    .await?;

    Ok(())
}

/// Validate configuration and check the knowledge file, credential and backend
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();

    // Check 1: Configuration validation
    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));
    checks.push((
        "Backend",
        format!("{} ({})", config.llm.backend, config.active_model()),
    ));

    // Check 2: Knowledge file
    match knowledge::load(&config.core.knowledge_file, config.core.max_context_chars) {
        Ok(ctx) if ctx.is_fallback() => {
            checks.push(("Knowledge file", "Missing".to_string()));
            issues.push(format!(
                "Knowledge file not found: {}. Answers will not be grounded in course material.",
                config.core.knowledge_file.display()
            ));
        }
        Ok(ctx) if ctx.is_truncated() => {
            checks.push((
                "Knowledge file",
                format!("Truncated to {} characters", config.core.max_context_chars),
            ));
        }
        Ok(ctx) => {
            checks.push((
                "Knowledge file",
                format!("Loaded ({} characters)", ctx.text().chars().count()),
            ));
        }
        Err(e) => {
            checks.push(("Knowledge file", "Unreadable".to_string()));
            issues.push(format!("Cannot read knowledge file: {}", e));
        }
    }

    // Check 3: Credential
    if config.llm.backend == Backend::Gemini {
        match secrets::api_key_from_env(&config.llm.gemini.api_key_env) {
            Ok(_) => checks.push(("Gemini API key", "Configured".to_string())),
            Err(e) => {
                checks.push(("Gemini API key", "Not configured".to_string()));
                issues.push(e.to_string());
            }
        }
    }

    // Check 4: Backend health
    match llm::build_provider(config) {
        Ok(provider) => {
            if provider.check_health().await {
                checks.push(("Backend health", "Reachable".to_string()));
            } else {
                checks.push(("Backend health", "Unreachable".to_string()));
                issues.push(match config.llm.backend {
                    Backend::Ollama => format!(
                        "Ollama is not reachable at {}. Start it with 'ollama serve'.",
                        config.llm.ollama.base_url
                    ),
                    Backend::Gemini => {
                        "Gemini API did not accept the request. Check the key and network."
                            .to_string()
                    }
                });
            }
        }
        Err(e) => {
            checks.push(("Backend health", "Not checked".to_string()));
            if config.llm.backend != Backend::Gemini {
                issues.push(format!("Cannot build backend: {}", e));
            }
        }
    }

    // Output results
    match format {
        OutputFormat::Text => {
            println!("UniHelp Diagnostics");
            println!("============================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Submit a turn while printing streamed fragments through the typewriter.
///
/// Ctrl-C cancels the pending reply. Failures are printed in place of the
/// reply since they never carry streamed text.
async fn run_displayed_turn(
    driver: &ConversationDriver,
    conversation: &mut Conversation,
    text: &str,
    typewriter: Typewriter,
) -> Result<TurnOutcome> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (fragments, printer) = typewriter.spawn(std::io::stdout());
    let outcome = driver
        .submit_turn_with(conversation, text, Some(fragments), &cancel)
        .await;
    watcher.abort();

    let mut out = printer.await.context("Display task panicked")??;
    match &outcome {
        TurnOutcome::Failed { text, .. } => writeln!(out, "\n{}", text)?,
        TurnOutcome::Replied(_) => writeln!(out)?,
        TurnOutcome::Ignored => {}
    }
    out.flush()?;

    Ok(outcome)
}

fn turn_json(question: &str, outcome: &TurnOutcome, driver: &ConversationDriver) -> serde_json::Value {
    json!({
        "question": question.trim(),
        "reply": outcome.text(),
        "error": outcome.error_kind(),
        "backend": driver.provider().name(),
        "model": driver.provider().model(),
    })
}

fn print_history(
    conversation: &Conversation,
    assistant_name: &str,
    format: OutputFormat,
) -> Result<()> {
    let history = conversation.displayable_history();

    match format {
        OutputFormat::Text => {
            if history.is_empty() {
                println!("(no messages yet)");
            }
            for message in &history {
                let speaker = match message.role {
                    MessageRole::User => "You",
                    _ => assistant_name,
                };
                println!("{}: {}", speaker, message.content);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&history)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_command_parsing() {
        assert_eq!(ChatCommand::parse("/clear"), Some(ChatCommand::Clear));
        assert_eq!(ChatCommand::parse("  /exit \n"), Some(ChatCommand::Exit));
        assert_eq!(ChatCommand::parse("/quit"), Some(ChatCommand::Exit));
        assert_eq!(ChatCommand::parse("/history"), Some(ChatCommand::History));
        assert_eq!(ChatCommand::parse("what is /clear?"), None);
        assert_eq!(ChatCommand::parse(""), None);
    }
}
