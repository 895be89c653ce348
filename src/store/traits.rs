//! Storage collaborator traits.
//!
//! The pipeline never does read-modify-write against these: ticket creation
//! and agent binding are single authoritative operations at this boundary, so
//! concurrent handlers for the same conversation converge without locks.

use async_trait::async_trait;
use uuid::Uuid;

use crate::agents::model::{ActivationRule, AgentProfile};
use crate::error::DatabaseError;
use crate::executions::model::AgentExecution;
use crate::pipeline::types::HistoryTurn;
use crate::tickets::model::{AgentBinding, AiConfig, Ticket};

/// Ticket persistence.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// The active (open, pending or in-progress) ticket for a conversation.
    async fn get_open_ticket_by_conversation(
        &self,
        conversation_id: &str,
        instance_id: &str,
    ) -> Result<Option<Ticket>, DatabaseError>;

    /// Get a ticket by ID.
    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, DatabaseError>;

    /// Create `ticket` unless its conversation already has an active ticket.
    ///
    /// Returns whichever ticket owns the conversation afterwards, so two racing
    /// callers both get the same row back.
    async fn upsert_ticket(&self, ticket: &Ticket) -> Result<Ticket, DatabaseError>;

    /// Atomically bind an agent to an active ticket.
    ///
    /// Re-binding the same agent is a no-op. Returns `None` when the ticket is
    /// missing or no longer active.
    async fn bind_agent(
        &self,
        ticket_id: Uuid,
        binding: &AgentBinding,
        ai_config: &AiConfig,
    ) -> Result<Option<Ticket>, DatabaseError>;

    /// Count one delivered AI reply.
    async fn record_ai_interaction(&self, ticket_id: Uuid) -> Result<(), DatabaseError>;

    /// Hand the ticket back to humans: status `pending`, auto-response off.
    async fn escalate_to_human(&self, ticket_id: Uuid) -> Result<(), DatabaseError>;
}

/// Read-only agent configuration.
#[async_trait]
pub trait AgentConfigStore: Send + Sync {
    async fn get_agent_profile(&self, id: &str) -> Result<Option<AgentProfile>, DatabaseError>;

    /// Active agents in catalog order.
    async fn list_active_agents(&self) -> Result<Vec<AgentProfile>, DatabaseError>;

    /// Rules scoped to `instance_id` (or all rules when `None`), in creation order.
    async fn list_activation_rules(
        &self,
        instance_id: Option<&str>,
    ) -> Result<Vec<ActivationRule>, DatabaseError>;
}

/// Append-only execution audit log.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append(&self, execution: &AgentExecution) -> Result<(), DatabaseError>;

    /// The execution recorded for an inbound message id, if any.
    async fn find_by_message(
        &self,
        message_id: &str,
    ) -> Result<Option<AgentExecution>, DatabaseError>;
}

/// Per-ticket conversation history.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// Append a turn. Appending the same `message_id` twice is a no-op.
    async fn append_turn(&self, ticket_id: Uuid, turn: &HistoryTurn) -> Result<(), DatabaseError>;

    /// The last `limit` turns, oldest first.
    async fn recent_turns(
        &self,
        ticket_id: Uuid,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>, DatabaseError>;
}
