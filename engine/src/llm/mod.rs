//! LLM Backend Abstraction Layer
//!
//! This module provides a common interface over the chat backends UniHelp
//! can talk to (a local Ollama server and the Gemini API). The
//! [`LLMProvider`] trait is the single capability the conversation driver
//! depends on: send an already-bounded message list, get one assistant
//! message back.
//!
//! Failure classification happens in the adapters. Every failure comes back
//! as a typed [`LLMError`] whose [`ErrorKind`] tells the caller which kind
//! occurred and whose [`LLMError::user_message`] is safe to show a student.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{Backend, Config};
use crate::secrets;
use sdk::errors::EngineError;

pub mod gemini;
pub mod ollama;

pub use sdk::types::{Message, MessageRole};

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Receives incremental reply text while a response is streaming in.
///
/// Sending is best-effort: a dropped receiver never fails the request.
pub type FragmentSender = mpsc::UnboundedSender<String>;

/// Errors that can occur while talking to a backend
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LLMError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider error ({status}): {detail}")]
    Provider { status: u16, detail: String },

    #[error("Request cancelled")]
    Cancelled,
}

/// Classification tag for an [`LLMError`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Authentication,
    QuotaExceeded,
    MalformedResponse,
    Provider,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Authentication => "authentication",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Provider => "provider",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl LLMError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LLMError::Timeout => ErrorKind::Timeout,
            LLMError::Connection(_) => ErrorKind::Connection,
            LLMError::Authentication(_) => ErrorKind::Authentication,
            LLMError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            LLMError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            LLMError::Provider { .. } => ErrorKind::Provider,
            LLMError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, LLMError::Timeout | LLMError::Connection(_))
    }

    /// Short explanation shown in the transcript in place of a reply.
    ///
    /// Never includes backend detail text, which may echo credentials.
    pub fn user_message(&self) -> String {
        match self {
            LLMError::Timeout => {
                "⏱️ ERROR: The assistant took too long to answer. Please try again.".to_string()
            }
            LLMError::Connection(_) => {
                "❌ ERROR: Could not reach the assistant service. Check that it is running and try again."
                    .to_string()
            }
            LLMError::Authentication(_) => {
                "❌ ERROR: Invalid or missing API key. Check the configured API key variable."
                    .to_string()
            }
            LLMError::QuotaExceeded(_) => {
                "⚠️ ERROR: The request limit for this service was reached. Try again later."
                    .to_string()
            }
            LLMError::MalformedResponse(_) => {
                "❌ ERROR: The assistant returned a response that could not be read.".to_string()
            }
            LLMError::Provider { status, .. } => {
                format!("❌ ERROR: The assistant service failed (HTTP {}).", status)
            }
            LLMError::Cancelled => "⚠️ The request was cancelled.".to_string(),
        }
    }

    /// Map a transport failure from `reqwest`
    pub(crate) fn from_transport(err: reqwest::Error, base_url: &str) -> Self {
        if err.is_timeout() {
            LLMError::Timeout
        } else if err.is_connect() {
            LLMError::Connection(format!("Cannot connect to {}", base_url))
        } else if err.is_decode() {
            LLMError::MalformedResponse(secrets::scrub(&err.to_string()))
        } else {
            LLMError::Connection(secrets::scrub(&err.to_string()))
        }
    }
}

/// A model a backend can chat with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    /// Identifier to put in the configuration
    pub name: String,

    /// Human-readable name, when the backend provides one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Backend trait that all chat adapters implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the backend (e.g., "ollama", "gemini")
    fn name(&self) -> &str;

    /// Model the backend is configured to use
    fn model(&self) -> &str;

    /// Returns true if this backend runs on the local machine
    fn is_local(&self) -> bool;

    /// Send a conversation and return the assistant's reply
    ///
    /// # Arguments
    /// * `messages` - Already-bounded history: optional system message first,
    ///   last element is the newest user message
    /// * `fragments` - Receives partial text as it arrives, if the backend streams
    ///
    /// # Returns
    /// * `Ok(Message)` - Assistant message holding the complete reply text
    /// * `Err(LLMError)` - Classified failure
    async fn send(&self, messages: &[Message], fragments: Option<FragmentSender>)
        -> Result<Message>;

    /// List chat-capable models offered by the backend
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Check if the backend is currently reachable
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Shared HTTP client with the configured request timeout
pub(crate) fn http_client(timeout: Duration) -> std::result::Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::Network(format!("Failed to create HTTP client: {}", e)))
}

/// Build the backend selected in the configuration.
///
/// # Errors
/// Fails when the HTTP client cannot be built or when the Gemini backend is
/// selected and no API key is available.
pub fn build_provider(config: &Config) -> std::result::Result<Arc<dyn LLMProvider>, EngineError> {
    let timeout = config.llm.request_timeout();

    let provider: Arc<dyn LLMProvider> = match config.llm.backend {
        Backend::Ollama => Arc::new(ollama::OllamaProvider::from_config(
            &config.llm.ollama,
            timeout,
        )?),
        Backend::Gemini => {
            let api_key = secrets::api_key_from_env(&config.llm.gemini.api_key_env)?;
            Arc::new(gemini::GeminiProvider::new(
                config.llm.gemini.clone(),
                api_key,
                timeout,
            )?)
        }
    };

    tracing::info!(
        "Using {} backend with model {}",
        provider.name(),
        provider.model()
    );

    Ok(provider)
}

/// Forward a fragment to the display side, ignoring a closed receiver.
pub(crate) fn emit_fragment(fragments: Option<&FragmentSender>, text: &str) {
    if let Some(tx) = fragments {
        if !text.is_empty() {
            let _ = tx.send(text.to_string());
        }
    }
}
