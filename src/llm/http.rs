//! OpenAI-compatible chat completions over HTTP.
//!
//! The model is asked to answer with `{"reply": "...", "confidence": 0.0-1.0}`.
//! Output that is not valid JSON is kept as the reply with zero confidence,
//! which the confidence gate will never send.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::agents::model::ModelParams;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, Generation, LanguageModelService, Prompt};

const PROVIDER: &str = "openai-compatible";

const RESPONSE_FORMAT: &str = "Answer ONLY with a JSON object of the form \
{\"reply\": \"<message to send to the customer>\", \"confidence\": <number between 0 and 1>}. \
confidence is how sure you are that the reply fully and correctly answers the customer.";

pub struct HttpModelService {
    base_url: String,
    api_key: SecretString,
    model: String,
    client: reqwest::Client,
}

impl HttpModelService {
    pub fn new(base_url: impl Into<String>, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_failed(reason: impl Into<String>) -> LlmError {
        LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ReplyPayload {
    reply: String,
    #[serde(default)]
    confidence: f64,
}

#[async_trait]
impl LanguageModelService for HttpModelService {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &ModelParams,
        timeout: Duration,
    ) -> Result<Generation, LlmError> {
        let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
        messages.push(ChatMessage::system(RESPONSE_FORMAT));
        messages.extend(prompt.messages.iter().cloned());

        let model = params.model.as_deref().unwrap_or(&self.model);
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        provider: PROVIDER.into(),
                        timeout,
                    }
                } else {
                    Self::request_failed(e.to_string())
                }
            })?;

        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(LlmError::AuthFailed {
                    provider: PROVIDER.into(),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(LlmError::RateLimited {
                    provider: PROVIDER.into(),
                    retry_after,
                });
            }
            s if !s.is_success() => {
                let text = resp.text().await.unwrap_or_default();
                return Err(Self::request_failed(format!("status {s}: {text}")));
            }
            _ => {}
        }

        let completion: CompletionResponse = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let (text, confidence) = parse_reply(&content).ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "empty reply".into(),
        })?;
        let tokens_used = completion.usage.map(|u| u.total_tokens).unwrap_or(0);

        debug!(model, tokens_used, confidence, "Generation complete");
        Ok(Generation {
            text,
            confidence,
            tokens_used,
        })
    }
}

/// Reply text and clamped confidence. `None` when there is nothing to say.
fn parse_reply(content: &str) -> Option<(String, f64)> {
    let json = extract_json_object(content);
    let (text, confidence) = match serde_json::from_str::<ReplyPayload>(&json) {
        Ok(payload) => (payload.reply, payload.confidence),
        Err(e) => {
            warn!(error = %e, "Model ignored the response format, treating output as zero confidence");
            (content.to_string(), 0.0)
        }
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Some((text, confidence))
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```") {
        let after = trimmed[start + 3..].trim_start_matches("json");
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
