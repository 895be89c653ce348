//! Execution records: the append-only audit trail of agent decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::DeliveryReceipt;

/// Terminal status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Generated above the confidence gate and delivered.
    Success,
    /// Generated but held back by the confidence gate.
    LowConfidence,
    /// Model timeout/error, dispatch failure or storage failure.
    Error,
    /// No agent was assigned; nothing executed.
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::LowConfidence => "low_confidence",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "low_confidence" => Some(Self::LowConfidence),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Which tier of the assignment strategy produced the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    Sticky,
    Scored,
    RuleFallback,
    None,
}

impl AssignmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sticky => "sticky",
            Self::Scored => "scored",
            Self::RuleFallback => "rule_fallback",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sticky" => Some(Self::Sticky),
            "scored" => Some(Self::Scored),
            "rule_fallback" => Some(Self::RuleFallback),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Outcome of running (or declining to run) an agent for one message.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub message_id: String,
    pub ticket_id: Uuid,
    pub agent_id: Option<String>,
    pub rule_id: Option<String>,
    pub strategy: AssignmentStrategy,
    pub input: String,
    pub output: String,
    pub confidence: f64,
    pub tokens_used: u32,
    pub execution_time_ms: u64,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub delivery: Option<DeliveryReceipt>,
}

impl ExecutionResult {
    /// A result for a message where no execution was attempted.
    pub fn skipped(message_id: &str, ticket_id: Uuid, input: &str, reason: &str) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            message_id: message_id.to_string(),
            ticket_id,
            agent_id: None,
            rule_id: None,
            strategy: AssignmentStrategy::None,
            input: input.to_string(),
            output: String::new(),
            confidence: 0.0,
            tokens_used: 0,
            execution_time_ms: 0,
            status: ExecutionStatus::Skipped,
            error: Some(reason.to_string()),
            delivery: None,
        }
    }

    /// A result for a message whose assignment failed before execution.
    pub fn failed(message_id: &str, ticket_id: Uuid, input: &str, reason: String) -> Self {
        Self {
            status: ExecutionStatus::Error,
            error: Some(reason),
            ..Self::skipped(message_id, ticket_id, input, "")
        }
    }

    pub fn was_delivered(&self) -> bool {
        self.delivery.is_some()
    }
}

/// Immutable audit entry for one agent invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: Uuid,
    pub message_id: String,
    pub ticket_id: Uuid,
    pub agent_id: Option<String>,
    pub rule_id: Option<String>,
    pub strategy: AssignmentStrategy,
    pub input: String,
    pub output: String,
    pub confidence: f64,
    pub tokens_used: u32,
    pub execution_time_ms: u64,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&ExecutionResult> for AgentExecution {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            id: result.execution_id,
            message_id: result.message_id.clone(),
            ticket_id: result.ticket_id,
            agent_id: result.agent_id.clone(),
            rule_id: result.rule_id.clone(),
            strategy: result.strategy,
            input: result.input.clone(),
            output: result.output.clone(),
            confidence: result.confidence,
            tokens_used: result.tokens_used,
            execution_time_ms: result.execution_time_ms,
            status: result.status,
            error: result.error.clone(),
            created_at: Utc::now(),
        }
    }
}
