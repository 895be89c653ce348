//! Message processor: the single entry point for gateway events.
//!
//! Flow:
//! 1. Normalize the raw event
//! 2. Idempotency check on the message id
//! 3. Resolve (or create) the ticket
//! 4. Assignment decision (sticky → scored → rule fallback)
//! 5. Execution gate and dispatch
//! 6. Audit record
//!
//! Only malformed events and storage failures before assignment are returned
//! as errors. Everything else ends in an audited terminal state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::executions::auditor::ExecutionAuditor;
use crate::executions::model::{ExecutionResult, ExecutionStatus};
use crate::gateway::MessagingGatewayClient;
use crate::llm::provider::LanguageModelService;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::normalizer;
use crate::pipeline::orchestrator::{AssignmentOrchestrator, AssignmentOutcome, SkipReason};
use crate::pipeline::types::{HistoryTurn, InboundMessage, NormalizedEvent};
use crate::store::{AgentConfigStore, ConversationLog, ExecutionLog, TicketStore};
use crate::tickets::resolver::TicketResolver;

/// Collaborators the pipeline is built from.
#[derive(Clone)]
pub struct PipelineDeps {
    pub tickets: Arc<dyn TicketStore>,
    pub agents: Arc<dyn AgentConfigStore>,
    pub executions: Arc<dyn ExecutionLog>,
    pub history: Arc<dyn ConversationLog>,
    pub model: Arc<dyn LanguageModelService>,
    pub gateway: Arc<dyn MessagingGatewayClient>,
}

/// How one inbound event ended.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// An agent ran; the result says whether the reply went out.
    Executed(ExecutionResult),
    Skipped {
        result: ExecutionResult,
        reason: SkipReason,
    },
    /// Assignment could not complete; recorded as an error.
    Failed(ExecutionResult),
    /// Already processed, or being processed right now.
    Duplicate { message_id: String },
    /// Sent by the business itself; kept as history only.
    Ignored { message_id: String },
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Executed(_) => "executed",
            Self::Skipped { .. } => "skipped",
            Self::Failed(_) => "failed",
            Self::Duplicate { .. } => "duplicate",
            Self::Ignored { .. } => "ignored",
        }
    }

    /// The audited result, for outcomes that produce one.
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Executed(result) | Self::Failed(result) | Self::Skipped { result, .. } => Some(result),
            Self::Duplicate { .. } | Self::Ignored { .. } => None,
        }
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.result().map(|r| r.status)
    }
}

/// Releases the in-flight claim on a message id when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(PoisonError::into_inner);
        ids.insert(id.to_string()).then(|| Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct MessageProcessor {
    resolver: TicketResolver,
    orchestrator: AssignmentOrchestrator,
    dispatcher: Dispatcher,
    auditor: ExecutionAuditor,
    executions: Arc<dyn ExecutionLog>,
    tickets: Arc<dyn TicketStore>,
    history: Arc<dyn ConversationLog>,
    history_turns: usize,
    in_flight: Mutex<HashSet<String>>,
}

impl MessageProcessor {
    pub fn new(deps: PipelineDeps, config: &PipelineConfig) -> Self {
        Self {
            resolver: TicketResolver::new(deps.tickets.clone()),
            orchestrator: AssignmentOrchestrator::new(deps.tickets.clone(), deps.agents.clone(), config),
            dispatcher: Dispatcher::new(
                deps.model.clone(),
                deps.gateway.clone(),
                deps.tickets.clone(),
                deps.history.clone(),
                config,
            ),
            auditor: ExecutionAuditor::new(deps.executions.clone()),
            executions: deps.executions,
            tickets: deps.tickets,
            history: deps.history,
            history_turns: config.history_turns,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Process one raw gateway event for `instance_id`.
    pub async fn handle_inbound_event(
        &self,
        instance_id: &str,
        raw: &[u8],
    ) -> Result<PipelineOutcome, PipelineError> {
        let event = normalizer::normalize(instance_id, raw).inspect_err(|e| {
            warn!(instance_id, error = %e, "Dropping malformed event");
        })?;
        self.handle_event(event).await
    }

    /// Process an already-normalized event.
    pub async fn handle_event(&self, event: NormalizedEvent) -> Result<PipelineOutcome, PipelineError> {
        if let NormalizedEvent::UnsupportedKind { message, raw_kind } = &event {
            debug!(message_id = %message.id, raw_kind = %raw_kind, "Unsupported kind, treating as document");
        }
        self.handle_message(event.into_message()).await
    }

    /// Process a JSON array of events independently.
    ///
    /// Failures on individual events are logged and returned in place; they
    /// don't affect the rest of the batch.
    pub async fn handle_batch(
        &self,
        instance_id: &str,
        events: &[Value],
    ) -> Vec<Result<PipelineOutcome, PipelineError>> {
        info!(instance_id, count = events.len(), "Processing event batch");

        let results = join_all(events.iter().map(|value| async move {
            let event = normalizer::normalize_value(instance_id, value)?;
            self.handle_event(event).await
        }))
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            error!(instance_id, failed, total = results.len(), "Batch had failing events");
        }
        results
    }

    async fn handle_message(&self, message: InboundMessage) -> Result<PipelineOutcome, PipelineError> {
        info!(
            message_id = %message.id,
            instance_id = %message.instance_id,
            conversation_id = %message.conversation_id,
            kind = message.kind.as_str(),
            "Processing inbound message"
        );

        if message.from_self {
            self.record_own_message(&message).await;
            return Ok(PipelineOutcome::Ignored { message_id: message.id });
        }

        let Some(_claim) = InFlight::claim(&self.in_flight, &message.id) else {
            debug!(message_id = %message.id, "Message already in flight");
            return Ok(PipelineOutcome::Duplicate { message_id: message.id });
        };

        if let Some(existing) = self.executions.find_by_message(&message.id).await? {
            info!(
                message_id = %message.id,
                execution_id = %existing.id,
                "Message already processed"
            );
            return Ok(PipelineOutcome::Duplicate { message_id: message.id });
        }

        let ticket = self
            .resolver
            .resolve(&message.conversation_id, &message.instance_id)
            .await
            .map_err(|source| PipelineError::NoTicket {
                conversation_id: message.conversation_id.clone(),
                source,
            })?;

        let history = self.load_history(ticket.id, &message).await;
        if let Err(e) = self
            .history
            .append_turn(ticket.id, &HistoryTurn::customer(&message))
            .await
        {
            warn!(ticket_id = %ticket.id, error = %e, "Failed to record customer turn");
        }

        let outcome = match self.orchestrator.assign(ticket, &message, &history).await {
            AssignmentOutcome::Assigned { ticket, assignment } => {
                let result = self
                    .dispatcher
                    .execute(&ticket, &assignment, &message, &history)
                    .await;
                PipelineOutcome::Executed(result)
            }
            AssignmentOutcome::Skipped { ticket, reason } => PipelineOutcome::Skipped {
                result: ExecutionResult::skipped(&message.id, ticket.id, &message.text, reason.as_str()),
                reason,
            },
            AssignmentOutcome::Failed { ticket, reason } => {
                PipelineOutcome::Failed(ExecutionResult::failed(&message.id, ticket.id, &message.text, reason))
            }
        };

        if let Some(result) = outcome.result() {
            self.auditor.record(result).await;
        }

        info!(
            message_id = %message.id,
            outcome = outcome.label(),
            status = outcome.status().map(|s| s.as_str()).unwrap_or("none"),
            "Inbound message done"
        );
        Ok(outcome)
    }

    /// Recent turns before this message, oldest first.
    async fn load_history(&self, ticket_id: uuid::Uuid, message: &InboundMessage) -> Vec<HistoryTurn> {
        if self.history_turns == 0 {
            return Vec::new();
        }
        match self.history.recent_turns(ticket_id, self.history_turns + 1).await {
            Ok(mut turns) => {
                // A redelivered message may already be in the log
                turns.retain(|t| t.message_id != message.id);
                let excess = turns.len().saturating_sub(self.history_turns);
                turns.drain(..excess);
                turns
            }
            Err(e) => {
                warn!(ticket_id = %ticket_id, error = %e, "Failed to load history, continuing without it");
                Vec::new()
            }
        }
    }

    /// Operator replies sent from the business phone become agent history on
    /// an existing ticket. They never create tickets or trigger agents.
    async fn record_own_message(&self, message: &InboundMessage) {
        let ticket = match self
            .tickets
            .get_open_ticket_by_conversation(&message.conversation_id, &message.instance_id)
            .await
        {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Failed to look up ticket for own message");
                return;
            }
        };
        let turn = HistoryTurn {
            at: message.occurred_at,
            ..HistoryTurn::agent(message.id.clone(), message.text.clone())
        };
        if let Err(e) = self.history.append_turn(ticket.id, &turn).await {
            warn!(ticket_id = %ticket.id, error = %e, "Failed to record own message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::agents::model::{ActivationRule, AgentProfile, AgentStatus, RuleConditions};
    use crate::error::DatabaseError;
    use crate::llm::fake::ScriptedModel;
    use crate::store::MemoryStore;
    use crate::testing::RecordingGateway;
    use crate::tickets::model::{AgentBinding, AiConfig, Ticket};

    fn deps(store: Arc<MemoryStore>, model: ScriptedModel, gateway: Arc<RecordingGateway>) -> PipelineDeps {
        PipelineDeps {
            tickets: store.clone(),
            agents: store.clone(),
            executions: store.clone(),
            history: store,
            model: Arc::new(model),
            gateway,
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .add_agent(AgentProfile {
                id: "sales-bot".into(),
                name: "Sales".into(),
                status: AgentStatus::Active,
                capabilities: Default::default(),
                prompt_template: "Você é o assistente de vendas.".into(),
                model_params: Default::default(),
            })
            .await;
        store
            .add_rule(ActivationRule {
                id: "r1".into(),
                agent_id: "sales-bot".into(),
                priority: 5,
                active: true,
                conditions: RuleConditions {
                    keywords: vec!["preço".into()],
                    ..Default::default()
                },
                created_at: chrono::Utc::now(),
            })
            .await;
        store
    }

    fn event(id: &str, text: &str) -> Vec<u8> {
        serde_json::json!({
            "id": id,
            "conversationId": "5511999999999@c.us",
            "type": "chat",
            "body": text,
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn redelivery_is_a_duplicate() {
        let store = seeded_store().await;
        let gateway = Arc::new(RecordingGateway::new());
        let processor = MessageProcessor::new(
            deps(store.clone(), ScriptedModel::replying("R$ 99", 0.9), gateway.clone()),
            &PipelineConfig::default(),
        );

        let first = processor
            .handle_inbound_event("shop-1", &event("m1", "qual o preço?"))
            .await
            .unwrap();
        assert_eq!(first.status(), Some(ExecutionStatus::Success));

        let second = processor
            .handle_inbound_event("shop-1", &event("m1", "qual o preço?"))
            .await
            .unwrap();
        assert!(matches!(second, PipelineOutcome::Duplicate { .. }));
        assert_eq!(store.executions().await.len(), 1);
        assert_eq!(gateway.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn own_messages_are_history_only() {
        let store = seeded_store().await;
        let gateway = Arc::new(RecordingGateway::new());
        let processor = MessageProcessor::new(
            deps(store.clone(), ScriptedModel::replying("x", 0.9), gateway.clone()),
            &PipelineConfig::default(),
        );
        let ticket = store
            .upsert_ticket(&Ticket::open("5511999999999@c.us", "shop-1"))
            .await
            .unwrap();

        let raw = serde_json::json!({
            "id": "op-1", "conversationId": "5511999999999@c.us",
            "body": "Oi, aqui é a Ana", "fromMe": true
        })
        .to_string();
        let outcome = processor.handle_inbound_event("shop-1", raw.as_bytes()).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::Ignored { .. }));
        assert!(store.executions().await.is_empty());
        assert!(gateway.sent().await.is_empty());
        let turns = store.recent_turns(ticket.id, 5).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "Oi, aqui é a Ana");
    }

    #[tokio::test]
    async fn history_reaches_the_model() {
        let store = seeded_store().await;
        let model = Arc::new(ScriptedModel::replying("R$ 99", 0.9));
        let processor = MessageProcessor::new(
            PipelineDeps {
                model: model.clone(),
                ..deps(store.clone(), ScriptedModel::replying("", 0.0), Arc::new(RecordingGateway::new()))
            },
            &PipelineConfig::default(),
        );

        processor
            .handle_inbound_event("shop-1", &event("m1", "qual o preço?"))
            .await
            .unwrap();
        processor
            .handle_inbound_event("shop-1", &event("m2", "e o plano premium?"))
            .await
            .unwrap();

        let prompts = model.prompts().await;
        assert_eq!(prompts.len(), 2);
        // system, customer m1, agent reply, current message
        assert_eq!(prompts[1].messages.len(), 4);
        assert_eq!(prompts[1].last_user_message(), Some("e o plano premium?"));
    }

    #[tokio::test]
    async fn malformed_event_is_an_error() {
        let store = seeded_store().await;
        let processor = MessageProcessor::new(
            deps(store.clone(), ScriptedModel::replying("x", 0.9), Arc::new(RecordingGateway::new())),
            &PipelineConfig::default(),
        );
        let err = processor
            .handle_inbound_event("shop-1", br#"{"body": "no id"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedEvent(_)));
        assert!(!err.is_retryable());
        assert!(store.tickets().await.is_empty());
    }

    struct DownTicketStore;

    #[async_trait]
    impl TicketStore for DownTicketStore {
        async fn get_open_ticket_by_conversation(&self, _: &str, _: &str) -> Result<Option<Ticket>, DatabaseError> {
            Err(DatabaseError::Pool("connection refused".into()))
        }
        async fn get_ticket(&self, _: Uuid) -> Result<Option<Ticket>, DatabaseError> {
            Err(DatabaseError::Pool("connection refused".into()))
        }
        async fn upsert_ticket(&self, _: &Ticket) -> Result<Ticket, DatabaseError> {
            Err(DatabaseError::Pool("connection refused".into()))
        }
        async fn bind_agent(&self, _: Uuid, _: &AgentBinding, _: &AiConfig) -> Result<Option<Ticket>, DatabaseError> {
            Err(DatabaseError::Pool("connection refused".into()))
        }
        async fn record_ai_interaction(&self, _: Uuid) -> Result<(), DatabaseError> {
            Err(DatabaseError::Pool("connection refused".into()))
        }
        async fn escalate_to_human(&self, _: Uuid) -> Result<(), DatabaseError> {
            Err(DatabaseError::Pool("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn ticket_store_outage_is_retryable() {
        let store = seeded_store().await;
        let processor = MessageProcessor::new(
            PipelineDeps {
                tickets: Arc::new(DownTicketStore),
                ..deps(store.clone(), ScriptedModel::replying("x", 0.9), Arc::new(RecordingGateway::new()))
            },
            &PipelineConfig::default(),
        );
        let err = processor
            .handle_inbound_event("shop-1", &event("m1", "qual o preço?"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoTicket { .. }));
        assert!(err.is_retryable());
        assert!(store.executions().await.is_empty());
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let store = seeded_store().await;
        let processor = MessageProcessor::new(
            deps(store.clone(), ScriptedModel::replying("R$ 99", 0.9), Arc::new(RecordingGateway::new())),
            &PipelineConfig::default(),
        );
        let events = vec![
            serde_json::json!({"id": "b1", "conversationId": "c1", "body": "qual o preço?"}),
            serde_json::json!({"conversationId": "c2", "body": "sem id"}),
            serde_json::json!({"id": "b3", "conversationId": "c3", "body": "bom dia"}),
        ];
        let results = processor.handle_batch("shop-1", &events).await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Ok(PipelineOutcome::Executed(_))));
        assert!(matches!(results[1], Err(PipelineError::MalformedEvent(_))));
        assert!(matches!(results[2], Ok(PipelineOutcome::Skipped { .. })));
        assert_eq!(store.executions().await.len(), 2);
    }
}
