//! Ticket resolver: find-or-create the conversation thread for a message.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::TicketStore;
use crate::tickets::model::Ticket;

/// Resolves the active ticket for a conversation.
///
/// Creation goes through [`TicketStore::upsert_ticket`], which is the single
/// authoritative create-if-absent, so two messages racing for a new
/// conversation end up on the same ticket.
pub struct TicketResolver {
    store: Arc<dyn TicketStore>,
}

impl TicketResolver {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        conversation_id: &str,
        instance_id: &str,
    ) -> Result<Ticket, DatabaseError> {
        if let Some(ticket) = self
            .store
            .get_open_ticket_by_conversation(conversation_id, instance_id)
            .await?
        {
            debug!(ticket_id = %ticket.id, status = ticket.status.as_str(), "Existing ticket");
            return Ok(ticket);
        }

        let candidate = Ticket::open(conversation_id, instance_id);
        let ticket = self.store.upsert_ticket(&candidate).await?;
        if ticket.id == candidate.id {
            info!(
                ticket_id = %ticket.id,
                conversation_id,
                instance_id,
                "Created ticket"
            );
        } else {
            debug!(ticket_id = %ticket.id, "Lost ticket creation race, reusing winner");
        }
        Ok(ticket)
    }
}
