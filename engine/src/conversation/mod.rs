//! Conversation history
//!
//! A [`Conversation`] is the ordered message history of one student session.
//! It keeps at most one system message and always at index 0; the only
//! mutations are appending user/assistant messages, bounding, and a full
//! reset back to a fresh system message.
//!
//! [`bound`] is the single sliding-window policy used both for what gets
//! sent to a backend and for what the session keeps.

use serde::Serialize;

use crate::llm::{Message, MessageRole};

/// Errors raised when rebuilding a conversation from raw messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("system message found at index {0}; it may only appear first")]
    MisplacedSystem(usize),
}

/// Return `[system (if first)] + last window non-system messages`.
///
/// Short inputs come back unchanged. Relative order is preserved and the
/// system message is never dropped.
pub fn bound(messages: &[Message], window: usize) -> Vec<Message> {
    let has_system = messages.first().map(Message::is_system).unwrap_or(false);
    let system_count = usize::from(has_system);

    if messages.len() <= window + system_count {
        return messages.to_vec();
    }

    let mut bounded = Vec::with_capacity(window + system_count);
    if has_system {
        bounded.push(messages[0].clone());
    }
    bounded.extend_from_slice(&messages[messages.len() - window..]);
    bounded
}

/// Message history for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Start a conversation holding only the system prompt
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Rebuild a conversation from stored messages, checking the system invariant
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, ConversationError> {
        if let Some(idx) = messages
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, m)| m.is_system())
            .map(|(idx, _)| idx)
        {
            return Err(ConversationError::MisplacedSystem(idx));
        }
        Ok(Self { messages })
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Replace the whole history with a fresh system message
    pub fn reset(&mut self, system_prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::system(system_prompt));
    }

    /// Apply [`bound`] to the stored history
    pub fn bound_in_place(&mut self, window: usize) {
        let non_system = self.non_system_len();
        if non_system > window {
            let first_kept = self.messages.len() - window;
            let start = usize::from(self.has_system());
            self.messages.drain(start..first_kept);
        }
    }

    /// Bounded copy, as sent to a backend
    pub fn bounded(&self, window: usize) -> Vec<Message> {
        bound(&self.messages, window)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.is_system())
            .map(|m| m.content.as_str())
    }

    /// Everything except the system message, in order
    pub fn displayable_history(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn has_system(&self) -> bool {
        self.system_prompt().is_some()
    }

    fn non_system_len(&self) -> usize {
        self.messages.len() - usize::from(self.has_system())
    }
}
