//! Shared types for the inbound message pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::model::MatchedRule;

// ── Inbound message ─────────────────────────────────────────────────

/// Content kind of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// Canonical inbound message. Immutable once normalized.
///
/// `id` is the gateway-unique idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Display name reported by the gateway, if any.
    pub sender_name: Option<String>,
    pub instance_id: String,
    pub text: String,
    pub kind: MessageKind,
    pub occurred_at: DateTime<Utc>,
    /// Sent by the business's own account (operator phone, another tool).
    pub from_self: bool,
}

/// Result of normalizing a raw gateway event.
///
/// Unknown content kinds are not an error: they come through as
/// `UnsupportedKind` carrying a `document` message.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    Message(InboundMessage),
    UnsupportedKind {
        message: InboundMessage,
        raw_kind: String,
    },
}

impl NormalizedEvent {
    pub fn message(&self) -> &InboundMessage {
        match self {
            Self::Message(message) | Self::UnsupportedKind { message, .. } => message,
        }
    }

    pub fn into_message(self) -> InboundMessage {
        match self {
            Self::Message(message) | Self::UnsupportedKind { message, .. } => message,
        }
    }
}

// ── Conversation history ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Customer,
    Agent,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
        }
    }
}

/// One message in a ticket's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// Gateway message id for customer turns, execution id for agent turns.
    pub message_id: String,
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl HistoryTurn {
    pub fn customer(message: &InboundMessage) -> Self {
        Self {
            message_id: message.id.clone(),
            role: TurnRole::Customer,
            text: message.text.clone(),
            at: message.occurred_at,
        }
    }

    pub fn agent(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            role: TurnRole::Agent,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

// ── Selection context ───────────────────────────────────────────────

/// Everything the agent selector scores against.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub text: String,
    pub kind: MessageKind,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub instance_id: String,
    /// Most recent turns, oldest first, excluding the current message.
    pub history: Vec<HistoryTurn>,
    /// Rules matching this message, already priority-ordered.
    pub rule_matches: Vec<MatchedRule>,
}

impl MessageContext {
    pub fn new(message: &InboundMessage, history: Vec<HistoryTurn>) -> Self {
        Self {
            text: message.text.clone(),
            kind: message.kind,
            sender_id: message.sender_id.clone(),
            sender_name: message.sender_name.clone(),
            instance_id: message.instance_id.clone(),
            history,
            rule_matches: Vec::new(),
        }
    }

    pub fn with_rule_matches(mut self, matches: Vec<MatchedRule>) -> Self {
        self.rule_matches = matches;
        self
    }
}
