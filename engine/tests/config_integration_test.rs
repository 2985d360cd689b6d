//! Integration tests for configuration management
//!
//! These tests verify that configuration files are loaded, validated and
//! processed with path expansion, and that bad values are rejected.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use unihelp_engine::config::{Backend, Config};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_toml_parsing() {
    let file = write_config(
        r#"
[core]
log_level = "debug"
knowledge_file = "~/courses/biology.txt"
max_context_chars = 5000

[chat]
assistant_name = "Tutor"
institution = "State University"
history_window = 6
typing_delay_ms = 0

[llm]
backend = "gemini"
request_timeout_secs = 30
max_attempts = 2
retry_backoff_ms = 250

[llm.ollama]
base_url = "http://localhost:11434"
model = "llama3.1:8b"
stream = false
max_tokens = 512
temperature = 0.3

[llm.gemini]
model = "gemini-2.0-flash"
api_key_env = "MY_GEMINI_KEY"

[server]
bind = "0.0.0.0:8080"
"#,
    );

    let config = Config::load_from_path(file.path()).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.core.max_context_chars, 5000);
    let home = dirs::home_dir().unwrap();
    assert_eq!(config.core.knowledge_file, home.join("courses/biology.txt"));

    assert_eq!(config.chat.assistant_name, "Tutor");
    assert_eq!(config.chat.institution.as_deref(), Some("State University"));
    assert_eq!(config.chat.history_window, 6);

    assert_eq!(config.llm.backend, Backend::Gemini);
    assert_eq!(config.llm.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.llm.retry_backoff(), Duration::from_millis(250));
    assert!(!config.llm.ollama.stream);
    assert_eq!(config.llm.ollama.max_tokens, Some(512));
    assert_eq!(config.llm.gemini.api_key_env, "MY_GEMINI_KEY");
    assert_eq!(config.active_model(), "gemini-2.0-flash");
    assert_eq!(config.server.bind, "0.0.0.0:8080");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let file = write_config(
        r#"
[core]

[llm]
backend = "ollama"
"#,
    );

    let config = Config::load_from_path(file.path()).unwrap();

    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.core.max_context_chars, 20_000);
    assert_eq!(config.chat.assistant_name, "UniHelp");
    assert_eq!(config.chat.history_window, 8);
    assert_eq!(config.llm.request_timeout(), Duration::from_secs(120));
    assert_eq!(config.llm.max_attempts, 1);
    assert_eq!(config.llm.ollama.base_url, "http://localhost:11434");
    assert_eq!(config.active_model(), "gemma3:1b");
    assert_eq!(config.llm.gemini.api_key_env, "GOOGLE_API_KEY");
    assert_eq!(config.server.bind, "127.0.0.1:5000");
    assert_eq!(config.server.max_sessions, 1000);
    assert_eq!(config.server.session_idle(), Duration::from_secs(3600));
}

#[test]
fn test_absolute_knowledge_path_is_kept() {
    let file = write_config(
        r#"
[core]
knowledge_file = "/srv/unihelp/knowledge.txt"

[llm]
backend = "ollama"
"#,
    );

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(
        config.core.knowledge_file,
        PathBuf::from("/srv/unihelp/knowledge.txt")
    );
}

#[test]
fn test_invalid_backend_rejected() {
    let file = write_config(
        r#"
[core]

[llm]
backend = "openai"
"#,
    );

    assert!(Config::load_from_path(file.path()).is_err());
}

#[test]
fn test_invalid_values_rejected() {
    for body in [
        "[core]\nlog_level = \"loud\"\n[llm]\nbackend = \"ollama\"\n",
        "[core]\nmax_context_chars = 0\n[llm]\nbackend = \"ollama\"\n",
        "[core]\n[llm]\nbackend = \"ollama\"\nrequest_timeout_secs = 0\n",
        "[core]\n[chat]\nhistory_window = 0\n[llm]\nbackend = \"ollama\"\n",
        "[core]\n[llm]\nbackend = \"ollama\"\n[server]\nmax_sessions = 0\n",
        "[core]\n[llm]\nbackend = \"ollama\"\n[llm.ollama]\ntemperature = 3.5\n",
        "[core]\n[llm]\nbackend = \"gemini\"\n[llm.gemini]\napi_key_env = \"  \"\n",
    ] {
        let file = write_config(body);
        assert!(
            Config::load_from_path(file.path()).is_err(),
            "config should be rejected:\n{}",
            body
        );
    }
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_default_config_survives_toml() {
    let config = Config::default();
    let serialized = toml::to_string_pretty(&config).unwrap();
    let parsed = Config::from_toml_str(&serialized).unwrap();

    assert_eq!(parsed.chat.typing_delay_ms, config.chat.typing_delay_ms);
    assert_eq!(parsed.llm.gemini.base_url, config.llm.gemini.base_url);
    assert_eq!(parsed.core.knowledge_file, config.core.knowledge_file);
}
