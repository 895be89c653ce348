//! Activation rule evaluator.
//!
//! A rule matches when every populated condition group matches. Within a
//! group any single value is enough (one keyword, one weekday, one tag).
//! Results are ordered by priority, highest first, with earlier-created rules
//! winning ties.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::agents::model::{ActivationRule, MatchedRule, RuleConditions};
use crate::error::DatabaseError;
use crate::pipeline::types::InboundMessage;
use crate::store::AgentConfigStore;
use crate::tickets::model::Ticket;

// ── Keyword matching ────────────────────────────────────────────────

/// Case-insensitive whole-word keyword matcher.
///
/// Word boundaries are Unicode-aware, so `preço` matches in
/// "qual o preço?" but `pre` does not.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<(String, Regex)>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .filter_map(|k| {
                Regex::new(&keyword_pattern(k))
                    .ok()
                    .map(|re| (k.to_lowercase(), re))
            })
            .collect();
        Self { keywords }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn any_match(&self, text: &str) -> bool {
        self.keywords.iter().any(|(_, re)| re.is_match(text))
    }

    /// Keywords (lowercased) found in `text`.
    pub fn matched<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.keywords
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Boundaries are only asserted on sides where the keyword has a word
/// character, so keywords like `R$` or `#promo` still match.
fn keyword_pattern(keyword: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let lead = if is_word(keyword.chars().next()) { r"\b" } else { "" };
    let trail = if is_word(keyword.chars().last()) { r"\b" } else { "" };
    format!("(?i){lead}{}{trail}", regex::escape(keyword))
}

// ── Rule evaluation ─────────────────────────────────────────────────

/// Whether `rule`'s conditions hold for this ticket and message.
///
/// Does not look at `rule.active` or the agent; see [`RuleEvaluator`].
pub fn conditions_match(conditions: &RuleConditions, ticket: &Ticket, message: &InboundMessage) -> bool {
    if !conditions.instance_ids.is_empty()
        && !conditions.instance_ids.iter().any(|i| *i == message.instance_id)
    {
        return false;
    }

    if !conditions.message_kinds.is_empty() && !conditions.message_kinds.contains(&message.kind) {
        return false;
    }

    if !conditions.keywords.is_empty() && !KeywordMatcher::new(&conditions.keywords).any_match(&message.text) {
        return false;
    }

    if let Some(window) = &conditions.time_window
        && !window.contains(message.occurred_at)
    {
        return false;
    }

    if !conditions.weekdays.is_empty()
        && !conditions
            .weekdays
            .contains(&conditions.local_weekday(message.occurred_at))
    {
        return false;
    }

    if !conditions.ticket_priority.is_empty() && !conditions.ticket_priority.contains(&ticket.priority) {
        return false;
    }

    if !conditions.client_tags.is_empty()
        && !conditions
            .client_tags
            .iter()
            .any(|tag| ticket.client_tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
    {
        return false;
    }

    true
}

/// Priority desc, then creation order. Stable, so equal rules keep store order.
fn sort_matches(matches: &mut [MatchedRule]) {
    matches.sort_by(|a, b| {
        b.rule
            .effective_priority()
            .cmp(&a.rule.effective_priority())
            .then_with(|| a.rule.created_at.cmp(&b.rule.created_at))
    });
}

/// Evaluates activation rules against the agent configuration store.
pub struct RuleEvaluator {
    agents: Arc<dyn AgentConfigStore>,
}

impl RuleEvaluator {
    pub fn new(agents: Arc<dyn AgentConfigStore>) -> Self {
        Self { agents }
    }

    /// All rules matching this message, best first. Empty when nothing matches.
    pub async fn evaluate(
        &self,
        ticket: &Ticket,
        message: &InboundMessage,
    ) -> Result<Vec<MatchedRule>, DatabaseError> {
        let rules = self
            .agents
            .list_activation_rules(Some(&message.instance_id))
            .await?;
        let active_agents = self.agents.list_active_agents().await?;

        let mut matches: Vec<MatchedRule> = rules
            .into_iter()
            .filter(|rule: &ActivationRule| rule.active)
            .filter_map(|rule| {
                let agent = active_agents.iter().find(|a| a.id == rule.agent_id)?;
                let matched = conditions_match(&rule.conditions, ticket, message);
                debug!(
                    rule_id = %rule.id,
                    agent_id = %rule.agent_id,
                    priority = rule.priority,
                    matched,
                    "Rule evaluated"
                );
                matched.then(|| MatchedRule {
                    rule,
                    agent: agent.clone(),
                })
            })
            .collect();

        sort_matches(&mut matches);
        Ok(matches)
    }
}
