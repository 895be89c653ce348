//! Configuration types, read from `AGENT_DISPATCH_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::tickets::model::{AiConfig, EscalationPolicy};

const PREFIX: &str = "AGENT_DISPATCH_";

/// Assignment policy, thresholds and timeouts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Run the scored selector for tickets without a sticky agent.
    pub auto_assignment_enabled: bool,
    /// Fall back to activation rules when scoring is disabled or yields nothing.
    pub rule_fallback_enabled: bool,
    /// Minimum selector score for a scored assignment.
    pub min_score: f64,
    /// Minimum selector confidence for a scored assignment.
    pub min_confidence: f64,
    /// Replies are sent only when generation confidence is strictly above this.
    pub dispatch_threshold: f64,
    pub model_timeout: Duration,
    pub send_timeout: Duration,
    /// Conversation turns handed to the selector and the model.
    pub history_turns: usize,
    /// AI settings written to a ticket when an agent is auto-assigned.
    pub default_ai_config: AiConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_assignment_enabled: true,
            rule_fallback_enabled: true,
            min_score: 0.3,
            min_confidence: 0.5,
            dispatch_threshold: 0.7,
            model_timeout: Duration::from_secs(8),
            send_timeout: Duration::from_secs(10),
            history_turns: 10,
            default_ai_config: AiConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let config = Self {
            auto_assignment_enabled: env.bool("AUTO_ASSIGN")?.unwrap_or(defaults.auto_assignment_enabled),
            rule_fallback_enabled: env.bool("RULE_FALLBACK")?.unwrap_or(defaults.rule_fallback_enabled),
            min_score: env.unit("MIN_SCORE")?.unwrap_or(defaults.min_score),
            min_confidence: env.unit("MIN_CONFIDENCE")?.unwrap_or(defaults.min_confidence),
            dispatch_threshold: env.unit("DISPATCH_THRESHOLD")?.unwrap_or(defaults.dispatch_threshold),
            model_timeout: env.millis("MODEL_TIMEOUT_MS")?.unwrap_or(defaults.model_timeout),
            send_timeout: env.millis("SEND_TIMEOUT_MS")?.unwrap_or(defaults.send_timeout),
            history_turns: env.parse("HISTORY_TURNS")?.unwrap_or(defaults.history_turns),
            default_ai_config: AiConfig {
                escalation: EscalationPolicy {
                    max_interactions: env
                        .parse("MAX_AI_INTERACTIONS")?
                        .unwrap_or(defaults.default_ai_config.escalation.max_interactions),
                    ..defaults.default_ai_config.escalation.clone()
                },
                ..defaults.default_ai_config.clone()
            },
        };
        Ok(config)
    }
}

/// Process-level settings for the server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub agents_path: PathBuf,
    /// Daily rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub gateway_base_url: String,
    pub gateway_api_key: SecretString,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        Ok(Self {
            port: env.parse("PORT")?.unwrap_or(8080),
            db_path: env
                .raw("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/agent-dispatch.db")),
            agents_path: env
                .raw("AGENTS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./agents.json")),
            log_dir: env.raw("LOG_DIR").map(PathBuf::from),
            llm: LlmConfig {
                base_url: env.required("LLM_BASE_URL")?,
                api_key: SecretString::from(env.required("LLM_API_KEY")?),
                model: env.raw("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            },
            gateway_base_url: env.required("GATEWAY_BASE_URL")?,
            gateway_api_key: SecretString::from(env.required("GATEWAY_API_KEY")?),
        })
    }
}

// ── Env helpers ─────────────────────────────────────────────────────

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn key(name: &str) -> String {
        format!("{PREFIX}{name}")
    }

    /// Trimmed, non-empty value.
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.raw(name)
            .ok_or_else(|| ConfigError::MissingEnvVar(Self::key(name)))
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.raw(name)
            .map(|v| {
                v.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    key: Self::key(name),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        self.raw(name)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(ConfigError::InvalidValue {
                    key: Self::key(name),
                    message: format!("expected a boolean, got '{other}'"),
                }),
            })
            .transpose()
    }

    /// A number in `[0, 1]`.
    fn unit(&self, name: &str) -> Result<Option<f64>, ConfigError> {
        match self.parse::<f64>(name)? {
            Some(v) if !(0.0..=1.0).contains(&v) => Err(ConfigError::InvalidValue {
                key: Self::key(name),
                message: format!("{v} is outside [0, 1]"),
            }),
            other => Ok(other),
        }
    }

    fn millis(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        match self.parse::<u64>(name)? {
            Some(0) => Err(ConfigError::InvalidValue {
                key: Self::key(name),
                message: "timeout must be positive".into(),
            }),
            other => Ok(other.map(Duration::from_millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{PREFIX}{k}"), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.auto_assignment_enabled);
        assert!(config.rule_fallback_enabled);
        assert_eq!(config.dispatch_threshold, 0.7);
        assert_eq!(config.model_timeout, Duration::from_secs(8));
        assert_eq!(config.default_ai_config.escalation.max_interactions, 10);
    }

    #[test]
    fn overrides_are_applied() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("AUTO_ASSIGN", "off"),
            ("RULE_FALLBACK", "yes"),
            ("MIN_SCORE", "0.45"),
            ("MODEL_TIMEOUT_MS", "2500"),
            ("HISTORY_TURNS", "4"),
            ("MAX_AI_INTERACTIONS", "0"),
        ]))
        .unwrap();
        assert!(!config.auto_assignment_enabled);
        assert!(config.rule_fallback_enabled);
        assert_eq!(config.min_score, 0.45);
        assert_eq!(config.model_timeout, Duration::from_millis(2500));
        assert_eq!(config.history_turns, 4);
        assert_eq!(config.default_ai_config.escalation.max_interactions, 0);
    }

    #[test]
    fn rejects_bad_values() {
        let err = PipelineConfig::from_lookup(lookup(&[("DISPATCH_THRESHOLD", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AGENT_DISPATCH_DISPATCH_THRESHOLD"));

        assert!(PipelineConfig::from_lookup(lookup(&[("AUTO_ASSIGN", "maybe")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("SEND_TIMEOUT_MS", "0")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("HISTORY_TURNS", "-1")])).is_err());
    }

    #[test]
    fn server_requires_collaborator_urls() {
        let err = ServerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));

        let config = ServerConfig::from_lookup(lookup(&[
            ("LLM_BASE_URL", "http://llm.local/v1"),
            ("LLM_API_KEY", "sk-test"),
            ("GATEWAY_BASE_URL", "http://gateway.local"),
            ("GATEWAY_API_KEY", "gw-key"),
            ("PORT", "9000"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.log_dir.is_none());
    }
}
