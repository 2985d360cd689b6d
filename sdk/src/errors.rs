//! Error types and handling
//!
//! This module provides the workspace-level error type. Backend failures
//! have their own type in the engine (`llm::LLMError`) because they are
//! recovered inside a conversation turn; the errors here are the ones that
//! reach a command handler or an HTTP response.
//!
//! All errors implement the `ErrorHint` trait which provides a short,
//! user-friendly hint and indicates whether the error is recoverable.

use thiserror::Error;

/// Trait for user-facing error context
pub trait ErrorHint {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets, file paths or internal details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable without restarting
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorHint};
///
/// let error = EngineError::SessionNotFound("abc".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::Config("bad backend".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Credential errors
    #[error("Secret error: {0}")]
    Secret(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    // Session store errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorHint for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Secret(_) => "Set the API key in the configured environment variable",
            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Server(_) => "The HTTP server could not start. Check the bind address",
            Self::SessionNotFound(_) => "This conversation no longer exists. Start a new one",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_) | Self::Server(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
