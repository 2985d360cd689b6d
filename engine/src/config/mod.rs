//! Configuration management
//!
//! This module handles loading, validation, and management of the UniHelp
//! configuration. Configuration is stored in TOML format at
//! ~/.unihelp/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, knowledge file location and its character budget
//! - **chat**: Assistant persona, history window, typing effect
//! - **llm**: Selected backend, timeout, retries and per-backend settings
//! - **server**: Bind address for the JSON API
//!
//! # Environment Overrides
//!
//! After the file is parsed, these variables take precedence:
//! - `UNIHELP_BACKEND`: `ollama` or `gemini`
//! - `UNIHELP_KNOWLEDGE_FILE`: path to the knowledge base text
//! - `UNIHELP_MODEL`: model name for the selected backend
//!
//! The Gemini API key is never part of this file; see [`GeminiConfig::api_key_env`].
//!
//! # Examples
//!
//! ```no_run
//! use unihelp_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Backend: {}", config.llm.backend);
//! println!("Window: {}", config.chat.history_window);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Conversation settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// LLM backend configuration
    pub llm: LLMConfig,

    /// HTTP API settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Knowledge base text file (supports ~ expansion)
    #[serde(default = "default_knowledge_file")]
    pub knowledge_file: PathBuf,

    /// Maximum number of characters of the knowledge file injected into the prompt
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

/// Conversation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Name the assistant introduces itself with
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,

    /// Institution mentioned in the system prompt
    #[serde(default)]
    pub institution: Option<String>,

    /// Number of non-system messages kept and sent
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Delay between words when printing streamed replies (0 disables pacing)
    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
}

/// Supported chat backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Locally hosted Ollama server
    Ollama,

    /// Google Gemini API
    Gemini,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Ollama => write!(f, "ollama"),
            Backend::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for Backend {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Backend::Ollama),
            "gemini" => Ok(Backend::Gemini),
            other => Err(EngineError::Config(format!(
                "Invalid backend '{}'. Must be one of: ollama, gemini",
                other
            ))),
        }
    }
}

/// LLM backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Backend used for conversations
    pub backend: Backend,

    /// Upper bound for one backend call, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per turn; only timeouts and connection errors are retried
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Ollama backend settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Gemini backend settings
    #[serde(default)]
    pub gemini: GeminiConfig,
}

impl LLMConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Ollama backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Stream the reply as newline-delimited JSON chunks
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Maximum tokens generated per reply (`num_predict`)
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Gemini backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL for Gemini API
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_gemini_api_key_env")]
    pub api_key_env: String,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the JSON API binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Sessions kept in memory; the least recently used one is evicted beyond this
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Sessions untouched for this many seconds are dropped
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl ServerConfig {
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_knowledge_file() -> PathBuf {
    PathBuf::from("~/.unihelp/knowledge.txt")
}

fn default_max_context_chars() -> usize {
    20_000
}

fn default_assistant_name() -> String {
    "UniHelp".to_string()
}

fn default_history_window() -> usize {
    8
}

fn default_typing_delay_ms() -> u64 {
    20
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "gemma3:1b".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_max_sessions() -> usize {
    1000
}

fn default_session_idle_secs() -> u64 {
    3600
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            institution: None,
            history_window: default_history_window(),
            typing_delay_ms: default_typing_delay_ms(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            stream: true,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
            api_key_env: default_gemini_api_key_env(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_sessions: default_max_sessions(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                knowledge_file: default_knowledge_file(),
                max_context_chars: default_max_context_chars(),
            },
            chat: ChatConfig::default(),
            llm: LLMConfig {
                backend: Backend::Ollama,
                request_timeout_secs: default_request_timeout_secs(),
                max_attempts: default_max_attempts(),
                retry_backoff_ms: default_retry_backoff_ms(),
                ollama: OllamaConfig::default(),
                gemini: GeminiConfig::default(),
            },
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.unihelp/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let default = Self::default();

        let toml_string = toml::to_string_pretty(&default)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Created default configuration at {}", path.display());

        let mut config = default;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.unihelp/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".unihelp").join("config.toml"))
    }

    /// Apply `UNIHELP_*` overrides using the given variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("UNIHELP_BACKEND") {
            self.llm.backend = backend.parse()?;
        }

        if let Some(path) = lookup("UNIHELP_KNOWLEDGE_FILE") {
            self.core.knowledge_file = PathBuf::from(path);
        }

        if let Some(model) = lookup("UNIHELP_MODEL") {
            self.set_active_model(model);
        }

        Ok(())
    }

    /// Switch to `backend` after loading (the `--backend` flag).
    ///
    /// `UNIHELP_MODEL` names the model of the backend actually used, so it is
    /// applied again to the newly selected backend.
    pub fn override_backend<F>(&mut self, backend: Backend, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.llm.backend = backend;
        if let Some(model) = lookup("UNIHELP_MODEL") {
            self.set_active_model(model);
        }
    }

    fn set_active_model(&mut self, model: String) {
        match self.llm.backend {
            Backend::Ollama => self.llm.ollama.model = model,
            Backend::Gemini => self.llm.gemini.model = model,
        }
    }

    /// Validate fields and expand ~ in paths
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.max_context_chars == 0 {
            return Err(EngineError::Config(
                "max_context_chars must be greater than 0".to_string(),
            ));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.chat.history_window == 0 {
            return Err(EngineError::Config(
                "history_window must be at least 1".to_string(),
            ));
        }

        if self.server.max_sessions == 0 {
            return Err(EngineError::Config(
                "max_sessions must be at least 1".to_string(),
            ));
        }

        if self.llm.max_attempts == 0 {
            return Err(EngineError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if let Some(temperature) = self.llm.ollama.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(EngineError::Config(
                    "ollama.temperature must be between 0.0 and 2.0".to_string(),
                ));
            }
        }

        if self.llm.gemini.api_key_env.trim().is_empty() {
            return Err(EngineError::Config(
                "gemini.api_key_env must name an environment variable".to_string(),
            ));
        }

        self.core.knowledge_file = expand_path(&self.core.knowledge_file)?;

        Ok(())
    }

    /// Model name of the selected backend
    pub fn active_model(&self) -> &str {
        match self.llm.backend {
            Backend::Ollama => &self.llm.ollama.model,
            Backend::Gemini => &self.llm.gemini.model,
        }
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.backend, Backend::Ollama);
        assert_eq!(config.chat.history_window, 8);
        assert_eq!(config.llm.max_attempts, 1);
        assert!(config.llm.ollama.stream);
        assert_eq!(config.active_model(), "gemma3:1b");
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.llm.backend, deserialized.llm.backend);
        assert_eq!(config.llm.gemini.model, deserialized.llm.gemini.model);
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("Gemini".parse::<Backend>().unwrap(), Backend::Gemini);
        assert_eq!(" ollama ".parse::<Backend>().unwrap(), Backend::Ollama);
        assert!("openai".parse::<Backend>().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("UNIHELP_BACKEND", "gemini"),
            ("UNIHELP_MODEL", "gemini-2.0-flash"),
            ("UNIHELP_KNOWLEDGE_FILE", "/srv/kb.txt"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.llm.backend, Backend::Gemini);
        assert_eq!(config.llm.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.llm.ollama.model, "gemma3:1b");
        assert_eq!(config.core.knowledge_file, PathBuf::from("/srv/kb.txt"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.core.log_level = "verbose".to_string();
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_zero_history_window_rejected() {
        let mut config = Config::default();
        config.chat.history_window = 0;
        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("history_window"));

        config.chat.history_window = 1;
        assert!(config.validate_and_process().is_ok());
    }

    #[test]
    fn test_zero_max_sessions_rejected() {
        let mut config = Config::default();
        config.server.max_sessions = 0;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_backend_override_reapplies_model_variable() {
        let vars: HashMap<&str, &str> = [("UNIHELP_MODEL", "gemini-2.0-flash")]
            .into_iter()
            .collect();
        let lookup = |key: &str| vars.get(key).map(|v| v.to_string());

        let mut config = Config::default();
        config.apply_env_overrides(lookup).unwrap();
        assert_eq!(config.llm.ollama.model, "gemini-2.0-flash");

        config.override_backend(Backend::Gemini, lookup);
        assert_eq!(config.llm.backend, Backend::Gemini);
        assert_eq!(config.active_model(), "gemini-2.0-flash");
    }

    #[test]
    fn test_backend_override_without_model_variable() {
        let mut config = Config::default();
        config.override_backend(Backend::Gemini, |_| None);
        assert_eq!(config.active_model(), "gemini-2.5-flash");
        assert_eq!(config.llm.ollama.model, "gemma3:1b");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.llm.max_attempts = 0;
        assert!(config.validate_and_process().is_err());
    }
}
