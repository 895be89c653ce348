//! In-memory backend implementing every store trait.
//!
//! Used by tests and as the runtime home of the agent catalog. Each
//! create-if-absent or bind runs under a single write lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::traits::{AgentConfigStore, ConversationLog, ExecutionLog, TicketStore};
use crate::agents::catalog::AgentCatalog;
use crate::agents::model::{ActivationRule, AgentProfile};
use crate::error::DatabaseError;
use crate::executions::model::AgentExecution;
use crate::pipeline::types::HistoryTurn;
use crate::tickets::model::{AgentBinding, AiConfig, Ticket, TicketStatus};

#[derive(Default)]
pub struct MemoryStore {
    tickets: RwLock<HashMap<Uuid, Ticket>>,
    agents: RwLock<Vec<AgentProfile>>,
    rules: RwLock<Vec<ActivationRule>>,
    executions: RwLock<Vec<AgentExecution>>,
    turns: RwLock<HashMap<Uuid, Vec<HistoryTurn>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with a catalog's agents and rules.
    pub fn from_catalog(catalog: AgentCatalog) -> Self {
        Self {
            agents: RwLock::new(catalog.agents),
            rules: RwLock::new(catalog.rules),
            ..Self::default()
        }
    }

    pub async fn add_agent(&self, agent: AgentProfile) {
        self.agents.write().await.push(agent);
    }

    pub async fn add_rule(&self, rule: ActivationRule) {
        self.rules.write().await.push(rule);
    }

    /// Change a ticket's status, as a human agent would.
    pub async fn set_status(&self, ticket_id: Uuid, status: TicketStatus) -> bool {
        let mut tickets = self.tickets.write().await;
        match tickets.get_mut(&ticket_id) {
            Some(ticket) => {
                ticket.status = status;
                ticket.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        self.tickets.read().await.values().cloned().collect()
    }

    pub async fn executions(&self) -> Vec<AgentExecution> {
        self.executions.read().await.clone()
    }
}

fn find_active<'a>(
    tickets: &'a HashMap<Uuid, Ticket>,
    conversation_id: &str,
    instance_id: &str,
) -> Option<&'a Ticket> {
    tickets.values().find(|t| {
        t.conversation_id == conversation_id && t.instance_id == instance_id && t.status.is_active()
    })
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn get_open_ticket_by_conversation(
        &self,
        conversation_id: &str,
        instance_id: &str,
    ) -> Result<Option<Ticket>, DatabaseError> {
        let tickets = self.tickets.read().await;
        Ok(find_active(&tickets, conversation_id, instance_id).cloned())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, DatabaseError> {
        Ok(self.tickets.read().await.get(&id).cloned())
    }

    async fn upsert_ticket(&self, ticket: &Ticket) -> Result<Ticket, DatabaseError> {
        let mut tickets = self.tickets.write().await;
        if let Some(existing) = find_active(&tickets, &ticket.conversation_id, &ticket.instance_id)
        {
            debug!(ticket_id = %existing.id, "Active ticket already exists");
            return Ok(existing.clone());
        }
        tickets.insert(ticket.id, ticket.clone());
        Ok(ticket.clone())
    }

    async fn bind_agent(
        &self,
        ticket_id: Uuid,
        binding: &AgentBinding,
        ai_config: &AiConfig,
    ) -> Result<Option<Ticket>, DatabaseError> {
        let mut tickets = self.tickets.write().await;
        let Some(ticket) = tickets.get_mut(&ticket_id) else {
            return Ok(None);
        };
        if !ticket.status.is_active() {
            return Ok(None);
        }
        if ticket.assigned_agent.as_ref() != Some(binding) {
            ticket.assigned_agent = Some(binding.clone());
            ticket.ai_config = Some(ai_config.clone());
            ticket.updated_at = Utc::now();
        }
        Ok(Some(ticket.clone()))
    }

    async fn record_ai_interaction(&self, ticket_id: Uuid) -> Result<(), DatabaseError> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "ticket".into(),
                id: ticket_id.to_string(),
            })?;
        ticket.ai_interactions += 1;
        ticket.updated_at = Utc::now();
        Ok(())
    }

    async fn escalate_to_human(&self, ticket_id: Uuid) -> Result<(), DatabaseError> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "ticket".into(),
                id: ticket_id.to_string(),
            })?;
        ticket.status = TicketStatus::Pending;
        if let Some(config) = ticket.ai_config.as_mut() {
            config.auto_response = false;
        }
        ticket.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AgentConfigStore for MemoryStore {
    async fn get_agent_profile(&self, id: &str) -> Result<Option<AgentProfile>, DatabaseError> {
        let agents = self.agents.read().await;
        Ok(agents.iter().find(|a| a.id == id).cloned())
    }

    async fn list_active_agents(&self) -> Result<Vec<AgentProfile>, DatabaseError> {
        let agents = self.agents.read().await;
        Ok(agents.iter().filter(|a| a.is_active()).cloned().collect())
    }

    async fn list_activation_rules(
        &self,
        instance_id: Option<&str>,
    ) -> Result<Vec<ActivationRule>, DatabaseError> {
        let rules = self.rules.read().await;
        let mut scoped: Vec<ActivationRule> = rules
            .iter()
            .filter(|r| match instance_id {
                Some(instance) => {
                    r.conditions.instance_ids.is_empty()
                        || r.conditions.instance_ids.iter().any(|i| i == instance)
                }
                None => true,
            })
            .cloned()
            .collect();
        scoped.sort_by_key(|r| r.created_at);
        Ok(scoped)
    }
}

#[async_trait]
impl ExecutionLog for MemoryStore {
    async fn append(&self, execution: &AgentExecution) -> Result<(), DatabaseError> {
        let mut executions = self.executions.write().await;
        if executions
            .iter()
            .any(|e| e.id == execution.id || e.message_id == execution.message_id)
        {
            return Err(DatabaseError::Constraint(format!(
                "execution for message {} already recorded",
                execution.message_id
            )));
        }
        executions.push(execution.clone());
        Ok(())
    }

    async fn find_by_message(
        &self,
        message_id: &str,
    ) -> Result<Option<AgentExecution>, DatabaseError> {
        let executions = self.executions.read().await;
        Ok(executions.iter().find(|e| e.message_id == message_id).cloned())
    }
}

#[async_trait]
impl ConversationLog for MemoryStore {
    async fn append_turn(&self, ticket_id: Uuid, turn: &HistoryTurn) -> Result<(), DatabaseError> {
        let mut turns = self.turns.write().await;
        let entry = turns.entry(ticket_id).or_default();
        if !entry.iter().any(|t| t.message_id == turn.message_id) {
            entry.push(turn.clone());
        }
        Ok(())
    }

    async fn recent_turns(
        &self,
        ticket_id: Uuid,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>, DatabaseError> {
        let turns = self.turns.read().await;
        let all = turns.get(&ticket_id).map(Vec::as_slice).unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agents::model::{AgentCapabilities, AgentStatus, ModelParams, RuleConditions};

    fn agent(id: &str, status: AgentStatus) -> AgentProfile {
        AgentProfile {
            id: id.into(),
            name: id.into(),
            status,
            capabilities: AgentCapabilities::default(),
            prompt_template: "help".into(),
            model_params: ModelParams::default(),
        }
    }

    #[tokio::test]
    async fn upsert_returns_existing_active_ticket() {
        let store = MemoryStore::new();
        let first = store.upsert_ticket(&Ticket::open("c1", "i1")).await.unwrap();
        let second = store.upsert_ticket(&Ticket::open("c1", "i1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_upserts_create_one_ticket() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.upsert_ticket(&Ticket::open("c1", "i1")).await })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn closed_ticket_allows_new_one() {
        let store = MemoryStore::new();
        let first = store.upsert_ticket(&Ticket::open("c1", "i1")).await.unwrap();
        store.set_status(first.id, TicketStatus::Closed).await;
        let second = store.upsert_ticket(&Ticket::open("c1", "i1")).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn bind_is_idempotent() {
        let store = MemoryStore::new();
        let ticket = store.upsert_ticket(&Ticket::open("c1", "i1")).await.unwrap();
        let binding = AgentBinding::ai("bot", "Bot");
        let first = store
            .bind_agent(ticket.id, &binding, &AiConfig::default())
            .await
            .unwrap()
            .unwrap();
        let second = store
            .bind_agent(ticket.id, &binding, &AiConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(second.assigned_agent, Some(binding));
    }

    #[tokio::test]
    async fn bind_refuses_closed_ticket() {
        let store = MemoryStore::new();
        let ticket = store.upsert_ticket(&Ticket::open("c1", "i1")).await.unwrap();
        store.set_status(ticket.id, TicketStatus::Resolved).await;
        let result = store
            .bind_agent(ticket.id, &AgentBinding::ai("bot", "Bot"), &AiConfig::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn escalation_turns_off_auto_response() {
        let store = MemoryStore::new();
        let ticket = store.upsert_ticket(&Ticket::open("c1", "i1")).await.unwrap();
        store
            .bind_agent(ticket.id, &AgentBinding::ai("bot", "Bot"), &AiConfig::default())
            .await
            .unwrap();
        store.escalate_to_human(ticket.id).await.unwrap();
        let ticket = store.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert!(!ticket.ai_config.unwrap().auto_response);
    }

    #[tokio::test]
    async fn lists_only_active_agents() {
        let store = MemoryStore::new();
        store.add_agent(agent("a", AgentStatus::Active)).await;
        store.add_agent(agent("b", AgentStatus::Inactive)).await;
        let active = store.list_active_agents().await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(store.get_agent_profile("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rules_scoped_by_instance() {
        let store = MemoryStore::new();
        store
            .add_rule(ActivationRule {
                id: "scoped".into(),
                agent_id: "a".into(),
                priority: 5,
                active: true,
                conditions: RuleConditions {
                    instance_ids: vec!["shop-2".into()],
                    ..Default::default()
                },
                created_at: Utc::now(),
            })
            .await;
        assert!(store.list_activation_rules(Some("shop-1")).await.unwrap().is_empty());
        assert_eq!(store.list_activation_rules(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn turns_are_deduplicated_and_limited() {
        let store = MemoryStore::new();
        let ticket_id = Uuid::new_v4();
        for i in 0..5 {
            let turn = HistoryTurn::agent(format!("m{i}"), format!("reply {i}"));
            store.append_turn(ticket_id, &turn).await.unwrap();
            store.append_turn(ticket_id, &turn).await.unwrap();
        }
        let recent = store.recent_turns(ticket_id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message_id, "m2");
        assert_eq!(recent[2].message_id, "m4");
    }
}
