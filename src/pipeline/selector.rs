//! Intelligent agent selector: scores every eligible agent for a message.
//!
//! Score (all terms in `[0, 1]`):
//!
//! ```text
//! score      = 0.6 * keyword + 0.2 * availability + 0.2 * rule_boost
//! keyword    = min(1, (current_hits + 0.5 * history_only_hits) / 3)
//! rule_boost = best matching rule priority / 10
//! confidence = score * (0.6 + 0.2 * signals)      signals ∈ {0, 1, 2}
//! ```
//!
//! A signal is a keyword hit or a rule match for the agent. The selector
//! never rejects a candidate on score; it returns `None` only when no agent
//! is eligible for the message at all.

use std::sync::Arc;

use tracing::debug;

use crate::agents::model::AgentProfile;
use crate::error::DatabaseError;
use crate::pipeline::rules::KeywordMatcher;
use crate::pipeline::types::{MessageContext, TurnRole};
use crate::store::AgentConfigStore;

const KEYWORD_WEIGHT: f64 = 0.6;
const AVAILABILITY_WEIGHT: f64 = 0.2;
const RULE_WEIGHT: f64 = 0.2;

/// Keyword hits needed for a full keyword score.
const KEYWORD_SATURATION: f64 = 3.0;
const HISTORY_HIT_WEIGHT: f64 = 0.5;

const BASE_CONFIDENCE: f64 = 0.6;
const CONFIDENCE_PER_SIGNAL: f64 = 0.2;

/// A scored agent. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCandidate {
    pub agent: AgentProfile,
    pub score: f64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// Best rule that also matched this agent, if any.
    pub rule_id: Option<String>,
}

/// Score one agent against the context.
pub fn score_agent(agent: &AgentProfile, ctx: &MessageContext) -> SelectionCandidate {
    let mut reasons = Vec::new();

    let matcher = KeywordMatcher::new(&agent.capabilities.keywords);
    let current = matcher.matched(&ctx.text);
    let history_only = ctx
        .history
        .iter()
        .filter(|turn| turn.role == TurnRole::Customer)
        .flat_map(|turn| matcher.matched(&turn.text))
        .filter(|k| !current.contains(k))
        .collect::<std::collections::BTreeSet<_>>();

    let hits = current.len() as f64 + HISTORY_HIT_WEIGHT * history_only.len() as f64;
    let keyword = (hits / KEYWORD_SATURATION).min(1.0);
    if !current.is_empty() {
        reasons.push(format!("keywords: {}", current.join(", ")));
    }
    if !history_only.is_empty() {
        let words: Vec<&str> = history_only.into_iter().collect();
        reasons.push(format!("history keywords: {}", words.join(", ")));
    }

    let availability = agent.capabilities.availability.clamp(0.0, 1.0);
    reasons.push(format!("availability {availability:.2}"));

    // Rule matches arrive priority-ordered, so the first is the best
    let best_rule = ctx.rule_matches.iter().find(|m| m.agent.id == agent.id);
    let rule_boost = best_rule
        .map(|m| f64::from(m.rule.effective_priority()) / 10.0)
        .unwrap_or(0.0);
    if let Some(m) = best_rule {
        reasons.push(format!("rule {} (priority {})", m.rule.id, m.rule.effective_priority()));
    }

    let score = (KEYWORD_WEIGHT * keyword + AVAILABILITY_WEIGHT * availability + RULE_WEIGHT * rule_boost)
        .clamp(0.0, 1.0);
    let signals = u8::from(keyword > 0.0) + u8::from(best_rule.is_some());
    let confidence =
        (score * (BASE_CONFIDENCE + CONFIDENCE_PER_SIGNAL * f64::from(signals))).clamp(0.0, 1.0);

    SelectionCandidate {
        agent: agent.clone(),
        score,
        confidence,
        reasons,
        rule_id: best_rule.map(|m| m.rule.id.clone()),
    }
}

/// Ranks agents from the configuration store.
pub struct AgentSelector {
    agents: Arc<dyn AgentConfigStore>,
}

impl AgentSelector {
    pub fn new(agents: Arc<dyn AgentConfigStore>) -> Self {
        Self { agents }
    }

    /// Every eligible agent, best first.
    ///
    /// Ties fall to confidence, then catalog order.
    pub async fn rank(&self, ctx: &MessageContext) -> Result<Vec<SelectionCandidate>, DatabaseError> {
        let agents = self.agents.list_active_agents().await?;
        let mut ranked: Vec<SelectionCandidate> = agents
            .iter()
            .filter(|a| a.capabilities.supports(ctx.kind))
            .map(|a| score_agent(a, ctx))
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });

        for c in &ranked {
            debug!(
                agent_id = %c.agent.id,
                score = c.score,
                confidence = c.confidence,
                reasons = ?c.reasons,
                "Agent scored"
            );
        }
        Ok(ranked)
    }

    /// The top-ranked candidate, or `None` when no agent is eligible.
    pub async fn select_best_agent(
        &self,
        ctx: &MessageContext,
    ) -> Result<Option<SelectionCandidate>, DatabaseError> {
        Ok(self.rank(ctx).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::agents::model::{
        ActivationRule, AgentCapabilities, AgentStatus, MatchedRule, RuleConditions,
    };
    use crate::pipeline::types::{HistoryTurn, MessageKind};
    use crate::store::MemoryStore;

    fn agent(id: &str, keywords: &[&str], availability: f64) -> AgentProfile {
        AgentProfile {
            id: id.into(),
            name: id.into(),
            status: AgentStatus::Active,
            capabilities: AgentCapabilities {
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                message_kinds: vec![],
                availability,
            },
            prompt_template: "You are helpful.".into(),
            model_params: Default::default(),
        }
    }

    fn ctx(text: &str) -> MessageContext {
        MessageContext {
            text: text.into(),
            kind: MessageKind::Text,
            sender_id: "c1".into(),
            sender_name: None,
            instance_id: "shop-1".into(),
            history: vec![],
            rule_matches: vec![],
        }
    }

    fn matched(agent: &AgentProfile, priority: u8) -> MatchedRule {
        MatchedRule {
            rule: ActivationRule {
                id: format!("rule-{}", agent.id),
                agent_id: agent.id.clone(),
                priority,
                active: true,
                conditions: RuleConditions::default(),
                created_at: Utc::now(),
            },
            agent: agent.clone(),
        }
    }

    #[test]
    fn keyword_hits_drive_score() {
        let sales = agent("sales", &["preço", "plano", "premium"], 1.0);
        let c = score_agent(&sales, &ctx("qual o preço do plano premium?"));
        // keyword 1.0, availability 1.0, no rule
        assert!((c.score - 0.8).abs() < 1e-9);
        // one signal
        assert!((c.confidence - 0.64).abs() < 1e-9);
        assert!(c.reasons.iter().any(|r| r.contains("preço")));
    }

    #[test]
    fn no_signals_means_low_confidence() {
        let idle = agent("idle", &["boleto"], 1.0);
        let c = score_agent(&idle, &ctx("bom dia"));
        assert!((c.score - 0.2).abs() < 1e-9);
        assert!((c.confidence - 0.12).abs() < 1e-9);
        assert!(c.rule_id.is_none());
    }

    #[test]
    fn rule_match_adds_boost_and_signal() {
        let sales = agent("sales", &["preço"], 1.0);
        let mut context = ctx("qual o preço?");
        context.rule_matches = vec![matched(&sales, 10)];
        let c = score_agent(&sales, &context);
        // 0.6 * 1/3 + 0.2 + 0.2
        assert!((c.score - 0.6).abs() < 1e-9);
        assert!((c.confidence - 0.6).abs() < 1e-9);
        assert_eq!(c.rule_id.as_deref(), Some("rule-sales"));
    }

    #[test]
    fn history_hits_count_half() {
        let sales = agent("sales", &["premium"], 0.0);
        let mut context = ctx("e quanto custa?");
        context.history = vec![HistoryTurn {
            message_id: "m0".into(),
            role: TurnRole::Customer,
            text: "quero o plano premium".into(),
            at: Utc::now(),
        }];
        let c = score_agent(&sales, &context);
        assert!((c.score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn confidence_stays_in_unit_range() {
        let a = agent("a", &["x", "y", "z", "w"], 5.0);
        let mut context = ctx("x y z w");
        context.rule_matches = vec![matched(&a, 10)];
        let c = score_agent(&a, &context);
        assert!((0.0..=1.0).contains(&c.score));
        assert!((0.0..=1.0).contains(&c.confidence));
        assert!((c.confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ranks_best_first_and_ties_keep_catalog_order() {
        let store = Arc::new(MemoryStore::new());
        store.add_agent(agent("first", &[], 1.0)).await;
        store.add_agent(agent("sales", &["preço"], 1.0)).await;
        store.add_agent(agent("second", &[], 1.0)).await;

        let selector = AgentSelector::new(store);
        let ranked = selector.rank(&ctx("qual o preço?")).await.unwrap();
        let ids: Vec<_> = ranked.iter().map(|c| c.agent.id.as_str()).collect();
        assert_eq!(ids, vec!["sales", "first", "second"]);
    }

    #[tokio::test]
    async fn none_only_when_no_agent_is_eligible() {
        let store = Arc::new(MemoryStore::new());
        let mut voice_only = agent("voice", &[], 1.0);
        voice_only.capabilities.message_kinds = vec![MessageKind::Audio];
        store.add_agent(voice_only).await;

        let selector = AgentSelector::new(store.clone());
        assert!(selector.select_best_agent(&ctx("oi")).await.unwrap().is_none());

        // A zero-keyword agent is still a candidate
        store.add_agent(agent("generic", &[], 0.0)).await;
        let best = selector.select_best_agent(&ctx("oi")).await.unwrap().unwrap();
        assert_eq!(best.agent.id, "generic");
        assert_eq!(best.score, 0.0);
    }
}
