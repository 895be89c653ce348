//! Agent profiles and activation rules. Read-only to the pipeline.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::pipeline::types::MessageKind;
use crate::tickets::model::TicketPriority;

// ── Agent profile ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
}

/// What an agent is good at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Kinds this agent can answer. Empty means all kinds.
    #[serde(default)]
    pub message_kinds: Vec<MessageKind>,
    /// Availability weight in `[0, 1]`.
    #[serde(default = "default_availability")]
    pub availability: f64,
}

fn default_availability() -> f64 {
    1.0
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            message_kinds: Vec::new(),
            availability: default_availability(),
        }
    }
}

impl AgentCapabilities {
    pub fn supports(&self, kind: MessageKind) -> bool {
        self.message_kinds.is_empty() || self.message_kinds.contains(&kind)
    }
}

/// Generation parameters passed through to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Overrides the service default model when set.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    512
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    pub prompt_template: String,
    #[serde(default)]
    pub model_params: ModelParams,
}

impl AgentProfile {
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

// ── Activation rules ────────────────────────────────────────────────

/// Local time-of-day window. Wraps past midnight when `start > end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// `HH:MM` or `HH:MM:SS`.
    pub start: String,
    pub end: String,
    /// Offset of the business's local time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl TimeWindow {
    /// Whether `at` falls inside the window. Unparseable bounds never match.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let (Some(start), Some(end)) = (parse_time(&self.start), parse_time(&self.end)) else {
            return false;
        };
        let local = self.local_time(at).time();
        if start <= end {
            local >= start && local <= end
        } else {
            local >= start || local <= end
        }
    }

    /// `at` shifted into the window's local offset.
    pub fn local_time(&self, at: DateTime<Utc>) -> chrono::NaiveDateTime {
        at.naive_utc() + Duration::minutes(i64::from(self.utc_offset_minutes))
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Condition groups of a rule. Every populated group must match; an empty
/// group is a wildcard, so a rule with no conditions matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub message_kinds: Vec<MessageKind>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    #[serde(default)]
    pub ticket_priority: Vec<TicketPriority>,
    #[serde(default)]
    pub client_tags: Vec<String>,
    #[serde(default)]
    pub instance_ids: Vec<String>,
}

impl RuleConditions {
    pub fn is_empty(&self) -> bool {
        self.message_kinds.is_empty()
            && self.keywords.is_empty()
            && self.time_window.is_none()
            && self.weekdays.is_empty()
            && self.ticket_priority.is_empty()
            && self.client_tags.is_empty()
            && self.instance_ids.is_empty()
    }

    /// Weekday of `at` in the rule's local time (UTC when there is no window).
    pub fn local_weekday(&self, at: DateTime<Utc>) -> Weekday {
        match &self.time_window {
            Some(window) => window.local_time(at).weekday(),
            None => at.weekday(),
        }
    }
}

/// Binds an agent to matching tickets when scored selection does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRule {
    pub id: String,
    pub agent_id: String,
    /// 1–10, higher wins.
    pub priority: u8,
    pub active: bool,
    #[serde(default)]
    pub conditions: RuleConditions,
    /// Creation order; earlier wins a priority tie.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

pub const MIN_RULE_PRIORITY: u8 = 1;
pub const MAX_RULE_PRIORITY: u8 = 10;

impl ActivationRule {
    /// Priority clamped into the documented 1–10 range.
    pub fn effective_priority(&self) -> u8 {
        self.priority.clamp(MIN_RULE_PRIORITY, MAX_RULE_PRIORITY)
    }
}

/// A rule that matched, together with its (active) agent.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRule {
    pub rule: ActivationRule,
    pub agent: AgentProfile,
}
