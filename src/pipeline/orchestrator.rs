//! Assignment orchestrator: decides which agent, if any, handles a message.
//!
//! The decision is a small state machine:
//!
//! ```text
//! Sticky ──▶ Scored ──▶ RuleFallback ──▶ Skipped
//!   │          │             │
//!   │          └──▶ Commit ◀─┘
//!   ▼                 │
//! Assigned ◀──────────┘        (any state may end in Failed)
//! ```
//!
//! The sticky state only reads the bound agent's profile, so ongoing
//! conversations never pay for rule evaluation or scoring.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agents::model::{AgentProfile, MatchedRule};
use crate::config::PipelineConfig;
use crate::error::DatabaseError;
use crate::executions::model::AssignmentStrategy;
use crate::pipeline::rules::RuleEvaluator;
use crate::pipeline::selector::AgentSelector;
use crate::pipeline::types::{HistoryTurn, InboundMessage, MessageContext};
use crate::store::{AgentConfigStore, TicketStore};
use crate::tickets::model::{ActivationMode, AgentBinding, AgentKind, AiConfig, Ticket};

/// The agent chosen for a message and how it was chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub agent: AgentProfile,
    pub strategy: AssignmentStrategy,
    pub rule_id: Option<String>,
}

/// Why no agent runs for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoEligibleAgent,
    HumanAssigned,
    ManualActivation,
    AutoResponseDisabled,
    /// AI-bound ticket that a human has taken into progress.
    InProgress,
    /// Reply budget used up; the ticket was handed back to humans.
    Escalated,
    /// The ticket closed between resolution and commit.
    TicketInactive,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEligibleAgent => "no_eligible_agent",
            Self::HumanAssigned => "human_assigned",
            Self::ManualActivation => "manual_activation",
            Self::AutoResponseDisabled => "auto_response_disabled",
            Self::InProgress => "in_progress",
            Self::Escalated => "escalated",
            Self::TicketInactive => "ticket_inactive",
        }
    }
}

/// Terminal result of the assignment decision.
#[derive(Debug, Clone)]
pub enum AssignmentOutcome {
    Assigned {
        ticket: Ticket,
        assignment: Assignment,
    },
    Skipped {
        ticket: Ticket,
        reason: SkipReason,
    },
    Failed {
        ticket: Ticket,
        reason: String,
    },
}

impl AssignmentOutcome {
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::Assigned { ticket, .. } | Self::Skipped { ticket, .. } | Self::Failed { ticket, .. } => {
                ticket
            }
        }
    }
}

#[derive(Debug)]
enum State {
    Sticky,
    Scored,
    RuleFallback,
    Commit(Assignment),
    Assigned(Assignment),
    Skipped(SkipReason),
    Failed(String),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Sticky => "sticky",
            Self::Scored => "scored",
            Self::RuleFallback => "rule_fallback",
            Self::Commit(_) => "commit",
            Self::Assigned(_) => "assigned",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Everything the states need for one message.
struct Run<'a> {
    ticket: Ticket,
    message: &'a InboundMessage,
    history: &'a [HistoryTurn],
    /// Evaluated at most once, on first use.
    rule_matches: Option<Vec<MatchedRule>>,
}

pub struct AssignmentOrchestrator {
    tickets: Arc<dyn TicketStore>,
    agents: Arc<dyn AgentConfigStore>,
    rules: RuleEvaluator,
    selector: AgentSelector,
    auto_assignment_enabled: bool,
    rule_fallback_enabled: bool,
    min_score: f64,
    min_confidence: f64,
    default_ai_config: AiConfig,
}

impl AssignmentOrchestrator {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        agents: Arc<dyn AgentConfigStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            tickets,
            rules: RuleEvaluator::new(agents.clone()),
            selector: AgentSelector::new(agents.clone()),
            agents,
            auto_assignment_enabled: config.auto_assignment_enabled,
            rule_fallback_enabled: config.rule_fallback_enabled,
            min_score: config.min_score,
            min_confidence: config.min_confidence,
            default_ai_config: config.default_ai_config.clone(),
        }
    }

    pub async fn assign(
        &self,
        ticket: Ticket,
        message: &InboundMessage,
        history: &[HistoryTurn],
    ) -> AssignmentOutcome {
        let mut run = Run {
            ticket,
            message,
            history,
            rule_matches: None,
        };

        let mut state = State::Sticky;
        loop {
            debug!(message_id = %message.id, state = state.name(), "Assignment state");
            state = match state {
                State::Sticky => self.sticky(&mut run).await,
                State::Scored => self.scored(&mut run).await,
                State::RuleFallback => self.rule_fallback(&mut run).await,
                State::Commit(assignment) => self.commit(&mut run, assignment).await,
                terminal => {
                    state = terminal;
                    break;
                }
            };
        }

        let ticket = run.ticket;
        match state {
            State::Assigned(assignment) => {
                info!(
                    message_id = %message.id,
                    ticket_id = %ticket.id,
                    agent_id = %assignment.agent.id,
                    strategy = assignment.strategy.as_str(),
                    "Agent assigned"
                );
                AssignmentOutcome::Assigned { ticket, assignment }
            }
            State::Skipped(reason) => {
                info!(
                    message_id = %message.id,
                    ticket_id = %ticket.id,
                    reason = reason.as_str(),
                    "Assignment skipped"
                );
                AssignmentOutcome::Skipped { ticket, reason }
            }
            State::Failed(reason) => {
                warn!(message_id = %message.id, ticket_id = %ticket.id, reason = %reason, "Assignment failed");
                AssignmentOutcome::Failed { ticket, reason }
            }
            other => AssignmentOutcome::Failed {
                ticket,
                reason: format!("assignment stopped in non-terminal state {}", other.name()),
            },
        }
    }

    // ── States ──────────────────────────────────────────────────────

    async fn sticky(&self, run: &mut Run<'_>) -> State {
        let ticket = &run.ticket;
        let manual = ticket
            .ai_config
            .as_ref()
            .is_some_and(|c| c.activation_mode == ActivationMode::Manual);

        let Some(binding) = ticket.assigned_agent.as_ref() else {
            return if manual {
                State::Skipped(SkipReason::ManualActivation)
            } else {
                State::Scored
            };
        };

        if binding.kind == AgentKind::Human {
            return State::Skipped(SkipReason::HumanAssigned);
        }
        if manual {
            return State::Skipped(SkipReason::ManualActivation);
        }
        let Some(binding) = ticket.sticky_agent() else {
            let auto_response = ticket.ai_config.as_ref().is_some_and(|c| c.auto_response);
            return State::Skipped(if auto_response {
                SkipReason::InProgress
            } else {
                SkipReason::AutoResponseDisabled
            });
        };

        if ticket.escalation_due() {
            return match self.tickets.escalate_to_human(ticket.id).await {
                Ok(()) => {
                    info!(
                        ticket_id = %ticket.id,
                        interactions = ticket.ai_interactions,
                        "AI reply budget exhausted, escalated to human"
                    );
                    State::Skipped(SkipReason::Escalated)
                }
                Err(e) => State::Failed(format!("escalation failed: {e}")),
            };
        }

        match self.agents.get_agent_profile(&binding.agent_id).await {
            Ok(Some(agent)) if agent.is_active() => State::Assigned(Assignment {
                agent,
                strategy: AssignmentStrategy::Sticky,
                rule_id: None,
            }),
            Ok(_) => {
                warn!(
                    ticket_id = %ticket.id,
                    agent_id = %binding.agent_id,
                    "Sticky agent missing or inactive, reselecting"
                );
                State::Scored
            }
            Err(e) => State::Failed(format!("loading sticky agent: {e}")),
        }
    }

    async fn scored(&self, run: &mut Run<'_>) -> State {
        if !self.auto_assignment_enabled {
            return State::RuleFallback;
        }

        let matches = match self.rule_matches(run).await {
            Ok(matches) => matches.to_vec(),
            Err(e) => {
                warn!(error = %e, "Rule evaluation failed, scoring without rule boosts");
                Vec::new()
            }
        };
        let ctx = MessageContext::new(run.message, run.history.to_vec()).with_rule_matches(matches);

        match self.selector.select_best_agent(&ctx).await {
            Ok(Some(candidate))
                if candidate.score >= self.min_score && candidate.confidence >= self.min_confidence =>
            {
                State::Commit(Assignment {
                    agent: candidate.agent,
                    strategy: AssignmentStrategy::Scored,
                    rule_id: candidate.rule_id,
                })
            }
            Ok(Some(candidate)) => {
                debug!(
                    agent_id = %candidate.agent.id,
                    score = candidate.score,
                    confidence = candidate.confidence,
                    "Best candidate below minimums"
                );
                State::RuleFallback
            }
            Ok(None) => {
                debug!(kind = run.message.kind.as_str(), "No agent eligible for scoring");
                State::RuleFallback
            }
            Err(e) => {
                warn!(error = %e, "Agent scoring failed, falling back to rules");
                State::RuleFallback
            }
        }
    }

    async fn rule_fallback(&self, run: &mut Run<'_>) -> State {
        if !self.rule_fallback_enabled {
            return State::Skipped(SkipReason::NoEligibleAgent);
        }
        match self.rule_matches(run).await {
            Ok(matches) => match matches.first() {
                Some(top) => State::Commit(Assignment {
                    agent: top.agent.clone(),
                    strategy: AssignmentStrategy::RuleFallback,
                    rule_id: Some(top.rule.id.clone()),
                }),
                None => State::Skipped(SkipReason::NoEligibleAgent),
            },
            Err(e) => State::Failed(format!("rule evaluation failed: {e}")),
        }
    }

    async fn commit(&self, run: &mut Run<'_>, assignment: Assignment) -> State {
        let binding = AgentBinding::ai(&assignment.agent.id, &assignment.agent.name);
        let ai_config = run
            .ticket
            .ai_config
            .clone()
            .unwrap_or_else(|| self.default_ai_config.clone());

        match self.tickets.bind_agent(run.ticket.id, &binding, &ai_config).await {
            Ok(Some(ticket)) => {
                run.ticket = ticket;
                State::Assigned(assignment)
            }
            Ok(None) => State::Skipped(SkipReason::TicketInactive),
            Err(e) => State::Failed(format!("binding agent {}: {e}", assignment.agent.id)),
        }
    }

    async fn rule_matches<'r>(&self, run: &'r mut Run<'_>) -> Result<&'r [MatchedRule], DatabaseError> {
        if run.rule_matches.is_none() {
            let matches = self.rules.evaluate(&run.ticket, run.message).await?;
            run.rule_matches = Some(matches);
        }
        Ok(run.rule_matches.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::agents::model::{
        ActivationRule, AgentCapabilities, AgentStatus, RuleConditions,
    };
    use crate::pipeline::types::MessageKind;
    use crate::store::MemoryStore;
    use crate::testing::CountingAgentStore;
    use crate::tickets::model::TicketStatus;

    fn agent(id: &str, keywords: &[&str]) -> AgentProfile {
        AgentProfile {
            id: id.into(),
            name: format!("{id} name"),
            status: AgentStatus::Active,
            capabilities: AgentCapabilities {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            },
            prompt_template: "You are helpful.".into(),
            model_params: Default::default(),
        }
    }

    fn rule(id: &str, agent_id: &str, priority: u8, keywords: &[&str]) -> ActivationRule {
        ActivationRule {
            id: id.into(),
            agent_id: agent_id.into(),
            priority,
            active: true,
            conditions: RuleConditions {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            },
            created_at: Utc::now(),
        }
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "c1".into(),
            sender_name: None,
            instance_id: "shop-1".into(),
            text: text.into(),
            kind: MessageKind::Text,
            occurred_at: Utc::now(),
            from_self: false,
        }
    }

    async fn setup(config: PipelineConfig) -> (Arc<MemoryStore>, Arc<CountingAgentStore>, AssignmentOrchestrator, Ticket) {
        let store = Arc::new(MemoryStore::new());
        let counting = Arc::new(CountingAgentStore::new(store.clone()));
        let orchestrator = AssignmentOrchestrator::new(store.clone(), counting.clone(), &config);
        let ticket = store.upsert_ticket(&Ticket::open("c1", "shop-1")).await.unwrap();
        (store, counting, orchestrator, ticket)
    }

    async fn bind(store: &MemoryStore, ticket: &Ticket, binding: AgentBinding, config: AiConfig) -> Ticket {
        store.bind_agent(ticket.id, &binding, &config).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn sticky_agent_short_circuits_selection() {
        let (store, counting, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("support-bot", &[])).await;
        store.add_agent(agent("sales-bot", &["preço"])).await;
        store.add_rule(rule("r1", "sales-bot", 9, &["preço"])).await;
        let ticket = bind(&store, &ticket, AgentBinding::ai("support-bot", "Support"), AiConfig::default()).await;

        let outcome = orchestrator.assign(ticket, &message("qual o preço?"), &[]).await;
        let AssignmentOutcome::Assigned { assignment, .. } = outcome else {
            panic!("expected sticky assignment, got {outcome:?}");
        };
        assert_eq!(assignment.agent.id, "support-bot");
        assert_eq!(assignment.strategy, AssignmentStrategy::Sticky);
        assert_eq!(counting.list_calls(), 0);
    }

    #[tokio::test]
    async fn inactive_sticky_agent_is_reselected() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        let mut retired = agent("old-bot", &[]);
        retired.status = AgentStatus::Inactive;
        store.add_agent(retired).await;
        store.add_agent(agent("sales-bot", &["preço", "plano", "premium"])).await;
        let ticket = bind(&store, &ticket, AgentBinding::ai("old-bot", "Old"), AiConfig::default()).await;

        let outcome = orchestrator
            .assign(ticket, &message("qual o preço do plano premium?"), &[])
            .await;
        let AssignmentOutcome::Assigned { ticket, assignment } = outcome else {
            panic!("expected reassignment, got {outcome:?}");
        };
        assert_eq!(assignment.strategy, AssignmentStrategy::Scored);
        assert_eq!(ticket.assigned_agent.unwrap().agent_id, "sales-bot");
    }

    #[tokio::test]
    async fn strong_candidate_is_committed() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("sales-bot", &["preço", "plano", "premium"])).await;

        let outcome = orchestrator
            .assign(ticket, &message("qual o preço do plano premium?"), &[])
            .await;
        let AssignmentOutcome::Assigned { ticket, assignment } = outcome else {
            panic!("expected assignment, got {outcome:?}");
        };
        assert_eq!(assignment.strategy, AssignmentStrategy::Scored);
        let binding = ticket.assigned_agent.unwrap();
        assert_eq!(binding.agent_id, "sales-bot");
        assert_eq!(binding.kind, AgentKind::Ai);
        assert!(ticket.ai_config.unwrap().auto_response);
    }

    #[tokio::test]
    async fn weak_candidate_falls_back_to_rules() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("sales-bot", &[])).await;
        store.add_rule(rule("r1", "sales-bot", 5, &["preço"])).await;

        let outcome = orchestrator.assign(ticket, &message("qual o preço?"), &[]).await;
        let AssignmentOutcome::Assigned { assignment, .. } = outcome else {
            panic!("expected rule fallback, got {outcome:?}");
        };
        assert_eq!(assignment.strategy, AssignmentStrategy::RuleFallback);
        assert_eq!(assignment.rule_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn fallback_runs_with_scoring_disabled() {
        let config = PipelineConfig {
            auto_assignment_enabled: false,
            ..Default::default()
        };
        let (store, _, orchestrator, ticket) = setup(config).await;
        store.add_agent(agent("sales-bot", &["preço", "plano", "premium"])).await;
        store.add_rule(rule("r1", "sales-bot", 5, &[])).await;

        let outcome = orchestrator
            .assign(ticket, &message("qual o preço do plano premium?"), &[])
            .await;
        assert!(matches!(
            outcome,
            AssignmentOutcome::Assigned { ref assignment, .. } if assignment.strategy == AssignmentStrategy::RuleFallback
        ));
    }

    #[tokio::test]
    async fn both_tiers_disabled_skips() {
        let config = PipelineConfig {
            auto_assignment_enabled: false,
            rule_fallback_enabled: false,
            ..Default::default()
        };
        let (store, _, orchestrator, ticket) = setup(config).await;
        store.add_agent(agent("sales-bot", &[])).await;
        store.add_rule(rule("r1", "sales-bot", 5, &[])).await;

        let outcome = orchestrator.assign(ticket, &message("oi"), &[]).await;
        assert!(matches!(
            outcome,
            AssignmentOutcome::Skipped { reason: SkipReason::NoEligibleAgent, .. }
        ));
    }

    #[tokio::test]
    async fn no_match_leaves_binding_untouched() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("billing-bot", &["boleto"])).await;
        store.add_rule(rule("r1", "billing-bot", 5, &["boleto"])).await;

        let id = ticket.id;
        let outcome = orchestrator.assign(ticket, &message("bom dia"), &[]).await;
        assert!(matches!(
            outcome,
            AssignmentOutcome::Skipped { reason: SkipReason::NoEligibleAgent, .. }
        ));
        assert!(store.get_ticket(id).await.unwrap().unwrap().assigned_agent.is_none());
    }

    #[tokio::test]
    async fn human_and_manual_tickets_are_skipped() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("sales-bot", &[])).await;
        store.add_rule(rule("r1", "sales-bot", 5, &[])).await;

        let human = bind(&store, &ticket, AgentBinding::human("ana", "Ana"), AiConfig::default()).await;
        let outcome = orchestrator.assign(human, &message("oi"), &[]).await;
        assert!(matches!(outcome, AssignmentOutcome::Skipped { reason: SkipReason::HumanAssigned, .. }));

        let mut manual = Ticket::open("c2", "shop-1");
        manual.ai_config = Some(AiConfig {
            activation_mode: ActivationMode::Manual,
            ..Default::default()
        });
        let manual = store.upsert_ticket(&manual).await.unwrap();
        let outcome = orchestrator.assign(manual, &message("oi"), &[]).await;
        assert!(matches!(outcome, AssignmentOutcome::Skipped { reason: SkipReason::ManualActivation, .. }));
    }

    #[tokio::test]
    async fn auto_response_off_is_skipped() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("sales-bot", &[])).await;
        let config = AiConfig {
            auto_response: false,
            ..Default::default()
        };
        let ticket = bind(&store, &ticket, AgentBinding::ai("sales-bot", "Sales"), config).await;

        let outcome = orchestrator.assign(ticket, &message("oi"), &[]).await;
        assert!(matches!(
            outcome,
            AssignmentOutcome::Skipped { reason: SkipReason::AutoResponseDisabled, .. }
        ));
    }

    #[tokio::test]
    async fn exhausted_budget_escalates() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("sales-bot", &[])).await;
        let mut config = AiConfig::default();
        config.escalation.max_interactions = 1;
        let ticket = bind(&store, &ticket, AgentBinding::ai("sales-bot", "Sales"), config).await;
        store.record_ai_interaction(ticket.id).await.unwrap();
        let ticket = store.get_ticket(ticket.id).await.unwrap().unwrap();

        let outcome = orchestrator.assign(ticket, &message("oi"), &[]).await;
        assert!(matches!(outcome, AssignmentOutcome::Skipped { reason: SkipReason::Escalated, .. }));

        let ticket = store.get_ticket(outcome.ticket().id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert!(ticket.sticky_agent().is_none());
    }

    #[tokio::test]
    async fn closed_before_commit_is_skipped() {
        let (store, _, orchestrator, ticket) = setup(PipelineConfig::default()).await;
        store.add_agent(agent("sales-bot", &[])).await;
        store.add_rule(rule("r1", "sales-bot", 5, &[])).await;
        store.set_status(ticket.id, TicketStatus::Closed).await;

        let outcome = orchestrator.assign(ticket, &message("oi"), &[]).await;
        assert!(matches!(
            outcome,
            AssignmentOutcome::Skipped { reason: SkipReason::TicketInactive, .. }
        ));
    }
}
