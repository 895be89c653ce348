//! Ticket model: the persistent conversation thread with a customer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a ticket. Transitions are driven by human agents;
/// the pipeline only creates `Open` tickets and escalates to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Pending,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// Tickets in these states still own their conversation.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Pending | Self::InProgress)
    }

    /// Only open/pending tickets may take the sticky path.
    pub fn allows_sticky(&self) -> bool {
        matches!(self, Self::Open | Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Who is handling a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Human,
    Ai,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
        }
    }
}

/// The agent bound to a ticket. A ticket has at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBinding {
    pub agent_id: String,
    pub kind: AgentKind,
    pub display_name: String,
}

impl AgentBinding {
    pub fn ai(agent_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: AgentKind::Ai,
            display_name: display_name.into(),
        }
    }

    pub fn human(agent_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: AgentKind::Human,
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    #[default]
    Immediate,
    Manual,
}

/// When the AI should hand a ticket back to humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// AI replies allowed before escalation. `0` disables the limit.
    pub max_interactions: u32,
    pub escalate_to_human: bool,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_interactions: 10,
            escalate_to_human: true,
        }
    }
}

/// Per-ticket AI behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    pub activation_mode: ActivationMode,
    pub auto_response: bool,
    #[serde(default)]
    pub escalation: EscalationPolicy,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            activation_mode: ActivationMode::Immediate,
            auto_response: true,
            escalation: EscalationPolicy::default(),
        }
    }
}

/// A conversation thread between a sender and the business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub conversation_id: String,
    pub instance_id: String,
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default)]
    pub client_tags: Vec<String>,
    pub assigned_agent: Option<AgentBinding>,
    pub ai_config: Option<AiConfig>,
    /// AI replies actually delivered on this ticket.
    #[serde(default)]
    pub ai_interactions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// A fresh open ticket with no binding.
    pub fn open(conversation_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            instance_id: instance_id.into(),
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            client_tags: Vec::new(),
            assigned_agent: None,
            ai_config: None,
            ai_interactions: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The AI binding that should keep handling this ticket without
    /// re-selection, if any.
    pub fn sticky_agent(&self) -> Option<&AgentBinding> {
        let binding = self.assigned_agent.as_ref()?;
        let auto_response = self.ai_config.as_ref().is_some_and(|c| c.auto_response);
        (binding.kind == AgentKind::Ai && auto_response && self.status.allows_sticky())
            .then_some(binding)
    }

    /// Whether the AI reply budget for this ticket is used up.
    pub fn escalation_due(&self) -> bool {
        match &self.ai_config {
            Some(config) => {
                let limit = config.escalation.max_interactions;
                config.escalation.escalate_to_human && limit > 0 && self.ai_interactions >= limit
            }
            None => false,
        }
    }
}
