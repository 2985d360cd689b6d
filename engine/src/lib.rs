//! UniHelp Engine Library
//!
//! Core of the UniHelp academic assistant: configuration, knowledge loading,
//! conversation bounding, backend adapters and the turn driver. It is used by
//! the `unihelp` binary and by the integration tests.

/// Configuration management module
pub mod config;

/// Secret handling and log scrubbing
pub mod secrets;

/// Knowledge base loading and system prompt rendering
pub mod knowledge;

/// Conversation history and bounding
pub mod conversation;

/// LLM backend abstraction layer
pub mod llm;

/// Turn orchestration
pub mod driver;

/// Terminal typing effect
pub mod display;

/// JSON API over the driver
pub mod server;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
