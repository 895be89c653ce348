//! Language-model integration.
//!
//! - **HTTP**: any OpenAI-compatible chat completions endpoint
//! - **Scripted**: deterministic fake for tests and offline runs

pub mod fake;
pub mod http;
pub mod provider;

pub use fake::{Scripted, ScriptedModel};
pub use http::HttpModelService;
pub use provider::*;

use std::sync::Arc;

/// Configuration for the HTTP model service.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create the model service from configuration.
pub fn create_service(config: &LlmConfig) -> Arc<dyn LanguageModelService> {
    tracing::info!(base_url = %config.base_url, model = %config.model, "Using HTTP model service");
    Arc::new(HttpModelService::new(
        config.base_url.clone(),
        config.api_key.clone(),
        config.model.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_service_uses_configured_model() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1".into(),
            api_key: secrecy::SecretString::from("test-key"),
            model: "llama3".into(),
        };
        assert_eq!(create_service(&config).name(), "llama3");
    }
}
