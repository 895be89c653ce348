//! Language-model service abstraction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::model::ModelParams;
use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered chat messages for one generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub messages: Vec<ChatMessage>,
}

impl Prompt {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// The last user message, which is the one being answered.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A generated reply with the model's self-reported confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub tokens_used: u32,
}

/// Produces agent replies.
#[async_trait]
pub trait LanguageModelService: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Generate a reply. Implementations should give up after `timeout`;
    /// callers enforce it regardless.
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &ModelParams,
        timeout: Duration,
    ) -> Result<Generation, LlmError>;
}
