//! Gemini Backend
//!
//! Blocking `generateContent` calls against the Google Generative Language
//! API. The system message travels as `systemInstruction`; assistant turns
//! are sent with Gemini's `model` role and mapped back on the way out.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    emit_fragment, http_client, FragmentSender, LLMError, LLMProvider, Message, MessageRole,
    ModelInfo, Result,
};
use crate::config::GeminiConfig;
use crate::secrets::{self, SecretString};
use sdk::errors::EngineError;

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiProvider {
    config: GeminiConfig,
    api_key: SecretString,
    client: Client,
}

impl GeminiProvider {
    pub fn new(
        mut config: GeminiConfig,
        api_key: SecretString,
        timeout: Duration,
    ) -> std::result::Result<Self, EngineError> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            config,
            api_key,
            client: http_client(timeout)?,
        })
    }

    /// Map a non-success HTTP status to an error
    async fn status_error(response: reqwest::Response) -> LLMError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}

/// Classify a failed `generateContent` call.
///
/// Gemini reports an invalid key as HTTP 400 with reason `API_KEY_INVALID`
/// and an exhausted quota as HTTP 429 / `RESOURCE_EXHAUSTED`.
fn classify_status(status: StatusCode, body: &str) -> LLMError {
    let parsed = serde_json::from_str::<GeminiErrorBody>(body).ok();
    let detail = secrets::scrub(
        parsed
            .as_ref()
            .map(|b| b.error.message.as_str())
            .unwrap_or(body),
    );
    let lowered = body.to_lowercase();

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || lowered.contains("api_key_invalid")
        || lowered.contains("api key not valid")
    {
        LLMError::Authentication(detail)
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || lowered.contains("resource_exhausted")
        || lowered.contains("quota")
    {
        LLMError::QuotaExceeded(detail)
    } else {
        LLMError::Provider {
            status: status.as_u16(),
            detail,
        }
    }
}

/// Build the request body from normalized messages.
///
/// Leading assistant turns are dropped: a bounded window can start on an
/// assistant reply, and Gemini expects the history to open with a user turn.
fn build_request(messages: &[Message]) -> GeminiRequest {
    let system_text: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let system_instruction = (!system_text.is_empty()).then(|| GeminiContent {
        role: None,
        parts: vec![GeminiPart {
            text: system_text.join("\n\n"),
        }],
    });

    let contents = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .skip_while(|m| m.role == MessageRole::Assistant)
        .map(|m| GeminiContent {
            role: Some(
                if m.role == MessageRole::Assistant {
                    "model"
                } else {
                    "user"
                }
                .to_string(),
            ),
            parts: vec![GeminiPart {
                text: m.content.clone(),
            }],
        })
        .collect();

    GeminiRequest {
        system_instruction,
        contents,
    }
}

/// Concatenate the text parts of the first candidate
fn extract_text(response: GeminiResponse) -> Result<String> {
    let candidate = match response.candidates.into_iter().next() {
        Some(candidate) => candidate,
        None => {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(LLMError::MalformedResponse(format!(
                "No candidates in response ({})",
                reason
            )));
        }
    };

    let content = candidate.content.ok_or_else(|| {
        LLMError::MalformedResponse(format!(
            "No content in candidate (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        ))
    })?;

    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    Ok(text)
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/models?pageSize=1", self.config.base_url);
        match self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.api_key.unsecure())
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Gemini health check failed: {}", secrets::scrub(&e.to_string()));
                false
            }
        }
    }

    async fn send(
        &self,
        messages: &[Message],
        fragments: Option<FragmentSender>,
    ) -> Result<Message> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );

        let payload = build_request(messages);

        tracing::info!(
            "Sending request to Gemini: model={}, turns={}",
            self.config.model,
            payload.contents.len()
        );

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.api_key.unsecure())
            .json(&payload)
            .send()
            .await
            .map_err(|e| LLMError::from_transport(e, &self.config.base_url))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let data: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LLMError::MalformedResponse(secrets::scrub(&e.to_string())))?;

        let text = extract_text(data)?;

        tracing::info!(
            "Gemini response received in {:.1}s ({} chars)",
            start.elapsed().as_secs_f64(),
            text.chars().count()
        );

        emit_fragment(fragments.as_ref(), &text);
        Ok(Message::assistant(text))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/models", self.config.base_url))
                .header(API_KEY_HEADER, self.api_key.unsecure())
                .query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| LLMError::from_transport(e, &self.config.base_url))?;

            if !response.status().is_success() {
                return Err(Self::status_error(response).await);
            }

            let page: GeminiModelList = response
                .json()
                .await
                .map_err(|e| LLMError::MalformedResponse(format!("Invalid model list: {}", e)))?;

            models.extend(
                page.models
                    .into_iter()
                    .filter(|m| {
                        m.supported_generation_methods
                            .iter()
                            .any(|method| method == "generateContent")
                    })
                    .map(|m| ModelInfo {
                        name: m
                            .name
                            .strip_prefix("models/")
                            .unwrap_or(&m.name)
                            .to_string(),
                        display_name: m.display_name,
                    }),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModelList {
    #[serde(default)]
    models: Vec<GeminiModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}
