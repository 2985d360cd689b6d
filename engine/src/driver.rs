//! Conversation driver
//!
//! Runs one turn at a time against a caller-owned [`Conversation`]:
//!
//! ```text
//! AwaitingUserInput --submit(blank)--> AwaitingUserInput   (Ignored)
//! AwaitingUserInput --submit(text)---> Sending
//! Sending --reply--------------------> Idle                (Replied)
//! Sending --error/timeout/cancel-----> Idle                (Failed)
//! AwaitingUserInput --clear----------> Idle                (fresh system prompt)
//! ```
//!
//! Backend failures never escape a turn: the user message and a synthetic
//! assistant message with the error text are stored, so the failure is
//! visible in the transcript.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::conversation::{bound, Conversation};
use crate::knowledge;
use crate::llm::{self, ErrorKind, FragmentSender, LLMError, LLMProvider, Message};
use crate::secrets;
use sdk::errors::EngineError;

/// Tunables for a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Non-system messages kept and sent; values below 1 act as 1 so the
    /// newest user message always reaches the backend
    pub history_window: usize,

    /// Upper bound for one backend call
    pub request_timeout: Duration,

    /// Attempts per turn (1 = no retry)
    pub max_attempts: u32,

    /// Pause between attempts
    pub retry_backoff: Duration,
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_window: config.chat.history_window,
            request_timeout: config.llm.request_timeout(),
            max_attempts: config.llm.max_attempts.max(1),
            retry_backoff: config.llm.retry_backoff(),
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of one submitted turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Input was blank; nothing was stored or sent
    Ignored,

    /// The backend answered with this text
    Replied(String),

    /// The backend failed; `text` was stored as the assistant turn
    Failed { kind: ErrorKind, text: String },
}

impl TurnOutcome {
    /// Text the caller should show, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            TurnOutcome::Ignored => None,
            TurnOutcome::Replied(text) | TurnOutcome::Failed { text, .. } => Some(text),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TurnOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Orchestrates turns between a conversation and a backend
#[derive(Clone)]
pub struct ConversationDriver {
    provider: Arc<dyn LLMProvider>,
    system_prompt: Arc<str>,
    settings: DriverSettings,
}

impl ConversationDriver {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        system_prompt: impl Into<Arc<str>>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
            settings,
        }
    }

    /// Load the knowledge file, render the system prompt and build the
    /// configured backend.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let knowledge =
            knowledge::load(&config.core.knowledge_file, config.core.max_context_chars)?;
        let prompt = knowledge::system_prompt(
            &config.chat.assistant_name,
            config.chat.institution.as_deref(),
            &knowledge,
        );
        let provider = llm::build_provider(config)?;

        Ok(Self::new(provider, prompt, DriverSettings::from_config(config)))
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// A conversation holding only the cached system prompt
    pub fn new_conversation(&self) -> Conversation {
        Conversation::new(self.system_prompt.as_ref())
    }

    /// Reset `conversation` to a single fresh system message
    pub fn clear_conversation(&self, conversation: &mut Conversation) {
        conversation.reset(self.system_prompt.as_ref());
        tracing::info!("Conversation cleared");
    }

    /// Submit one user message without streaming or cancellation
    pub async fn submit_turn(&self, conversation: &mut Conversation, text: &str) -> TurnOutcome {
        self.submit_turn_with(conversation, text, None, &CancellationToken::new())
            .await
    }

    /// Submit one user message.
    ///
    /// `fragments` receives reply text as it streams in; the returned outcome
    /// always carries the complete text. Cancelling `cancel` ends the turn on
    /// the failure path.
    pub async fn submit_turn_with(
        &self,
        conversation: &mut Conversation,
        text: &str,
        fragments: Option<FragmentSender>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Ignored;
        }

        // The stored history is not touched until the call has finished, so a
        // dropped turn future leaves it as it was.
        let window = self.settings.history_window.max(1);
        let mut outgoing = conversation.messages().to_vec();
        outgoing.push(Message::user(text));
        let outgoing = bound(&outgoing, window);

        tracing::info!(
            "Submitting turn to {} ({} messages, {} chars of user input)",
            self.provider.name(),
            outgoing.len(),
            text.chars().count()
        );

        let outcome = match self.call_with_retry(&outgoing, fragments, cancel).await {
            Ok(reply) => {
                conversation.push_user(text);
                conversation.push_assistant(reply.content.clone());
                TurnOutcome::Replied(reply.content)
            }
            Err(e) => {
                tracing::warn!(
                    "Turn failed ({}): {}",
                    e.kind(),
                    secrets::scrub(&e.to_string())
                );
                let error_text = e.user_message();
                conversation.push_user(text);
                conversation.push_assistant(error_text.clone());
                TurnOutcome::Failed {
                    kind: e.kind(),
                    text: error_text,
                }
            }
        };

        conversation.bound_in_place(window);
        outcome
    }

    async fn call_with_retry(
        &self,
        messages: &[Message],
        fragments: Option<FragmentSender>,
        cancel: &CancellationToken,
    ) -> Result<Message, LLMError> {
        let mut attempt = 1;
        loop {
            match self.call_once(messages, fragments.clone(), cancel).await {
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    tracing::warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        self.settings.max_attempts,
                        e.kind(),
                        self.settings.retry_backoff
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LLMError::Cancelled),
                        _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn call_once(
        &self,
        messages: &[Message],
        fragments: Option<FragmentSender>,
        cancel: &CancellationToken,
    ) -> Result<Message, LLMError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LLMError::Cancelled),
            result = tokio::time::timeout(
                self.settings.request_timeout,
                self.provider.send(messages, fragments),
            ) => result.unwrap_or(Err(LLMError::Timeout)),
        }
    }
}
