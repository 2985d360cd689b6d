//! Ollama Backend
//!
//! This module implements the LLMProvider trait for Ollama, a locally hosted
//! model server, typically at http://localhost:11434.
//!
//! Key features:
//! - Local execution (no API keys required)
//! - Newline-delimited JSON streaming, accumulated into one reply
//! - Optional non-streaming mode
//! - Error mapping to LLMError

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    emit_fragment, http_client, FragmentSender, LLMError, LLMProvider, Message, MessageRole,
    ModelInfo, Result,
};
use crate::config::OllamaConfig;
use crate::secrets;
use sdk::errors::EngineError;

/// Ollama backend
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "gemma3:1b")
    model: String,

    /// Request a streamed reply
    stream: bool,

    /// Generation options sent with every request
    options: Option<OllamaOptions>,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider with default options
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "gemma3:1b")
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, EngineError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            stream: true,
            options: None,
            client: http_client(timeout)?,
        })
    }

    /// Create a provider from the `[llm.ollama]` section
    pub fn from_config(
        config: &OllamaConfig,
        timeout: Duration,
    ) -> std::result::Result<Self, EngineError> {
        let mut provider = Self::new(&config.base_url, &config.model, timeout)?;
        provider.stream = config.stream;
        provider.options = OllamaOptions::from_config(config);
        Ok(provider)
    }

    /// Toggle streaming mode
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Convert our Message format to Ollama's format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: match msg.role {
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                    MessageRole::System => "system".to_string(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }

    /// Map a non-success HTTP status to an error
    async fn status_error(&self, response: reqwest::Response) -> LLMError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<OllamaErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        let detail = secrets::scrub(&detail);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LLMError::Authentication(detail),
            StatusCode::TOO_MANY_REQUESTS => LLMError::QuotaExceeded(detail),
            _ => LLMError::Provider {
                status: status.as_u16(),
                detail,
            },
        }
    }

    async fn read_stream(
        &self,
        response: reqwest::Response,
        fragments: Option<&FragmentSender>,
    ) -> Result<String> {
        let mut byte_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut acc = StreamAccumulator::default();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| LLMError::from_transport(e, &self.base_url))?;
            buffer.extend_from_slice(&bytes);

            // Lines are split on raw bytes so multi-byte characters that
            // straddle chunk boundaries stay intact.
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let fragment = acc.push_line(&line)?;
                emit_fragment(fragments, &fragment);
                if acc.done {
                    return Ok(acc.text);
                }
            }
        }

        if !buffer.is_empty() {
            let fragment = acc.push_line(&buffer)?;
            emit_fragment(fragments, &fragment);
        }

        if acc.done {
            Ok(acc.text)
        } else {
            Err(LLMError::MalformedResponse(
                "Stream ended before the completion marker".to_string(),
            ))
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn send(
        &self,
        messages: &[Message],
        fragments: Option<FragmentSender>,
    ) -> Result<Message> {
        let ollama_messages = self.convert_messages(messages);

        tracing::debug!(
            "Ollama request: model={}, messages={}, total_chars={}, stream={}",
            self.model,
            ollama_messages.len(),
            ollama_messages
                .iter()
                .map(|m| m.content.chars().count())
                .sum::<usize>(),
            self.stream
        );

        let request = OllamaRequest {
            model: &self.model,
            messages: ollama_messages,
            stream: self.stream,
            options: self.options.as_ref(),
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::from_transport(e, &self.base_url))?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let content = if self.stream {
            self.read_stream(response, fragments.as_ref()).await?
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| LLMError::from_transport(e, &self.base_url))?;
            let mut acc = StreamAccumulator::default();
            let text = acc.push_line(body.as_bytes())?;
            if text.is_empty() && !acc.done {
                return Err(LLMError::MalformedResponse(
                    "Response carried no message".to_string(),
                ));
            }
            emit_fragment(fragments.as_ref(), &text);
            acc.text
        };

        tracing::info!(
            "Ollama response received in {:.1}s ({} chars)",
            start.elapsed().as_secs_f64(),
            content.chars().count()
        );

        Ok(Message::assistant(content))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LLMError::from_transport(e, &self.base_url))?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let tags: OllamaTags = response
            .json()
            .await
            .map_err(|e| LLMError::MalformedResponse(format!("Invalid model list: {}", e)))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                name: m.name,
                display_name: None,
            })
            .collect())
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Ollama health check failed: {}", e);
                false
            }
        }
    }
}

/// Accumulates streamed chunks into the full reply
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    done: bool,
}

impl StreamAccumulator {
    /// Feed one JSON line; returns the text fragment it carried (possibly empty)
    fn push_line(&mut self, line: &[u8]) -> Result<String> {
        let line = std::str::from_utf8(line)
            .map_err(|e| LLMError::MalformedResponse(format!("Invalid UTF-8 in stream: {}", e)))?
            .trim();
        if line.is_empty() {
            return Ok(String::new());
        }

        let chunk: OllamaChunk = serde_json::from_str(line)
            .map_err(|e| LLMError::MalformedResponse(format!("Invalid stream chunk: {}", e)))?;

        if let Some(error) = chunk.error {
            return Err(LLMError::Provider {
                status: 200,
                detail: secrets::scrub(&error),
            });
        }

        // Chat chunks carry `message.content`; generate-style chunks use `response`.
        let fragment = chunk
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .or(chunk.response)
            .unwrap_or_default();

        self.text.push_str(&fragment);
        self.done = self.done || chunk.done;
        Ok(fragment)
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a OllamaOptions>,
}

/// Generation options
#[derive(Debug, Clone, Serialize, PartialEq)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl OllamaOptions {
    fn from_config(config: &OllamaConfig) -> Option<Self> {
        if config.max_tokens.is_none() && config.temperature.is_none() {
            return None;
        }
        Some(Self {
            num_predict: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

/// One streamed chunk, or the whole body in non-streaming mode
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
}
