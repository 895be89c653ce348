//! HTTP gateway client.
//!
//! Posts `{number, text}` to `{base_url}/message/sendText/{instance}` with the
//! API key in an `apikey` header.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::{DeliveryReceipt, MessagingGatewayClient};

pub struct HttpGatewayClient {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl HttpGatewayClient {
    pub fn new(base_url: impl Into<String>, api_key: SecretString, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn send_url(&self, instance_id: &str) -> String {
        format!("{}/message/sendText/{instance_id}", self.base_url)
    }
}

#[async_trait]
impl MessagingGatewayClient for HttpGatewayClient {
    async fn send(
        &self,
        instance_id: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<DeliveryReceipt, GatewayError> {
        let body = serde_json::json!({
            "number": conversation_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.send_url(instance_id))
            .header("apikey", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::SendFailed {
                instance: instance_id.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // Any 2xx means delivered; the body only carries an optional receipt id
        let body = resp.bytes().await.unwrap_or_default();
        let message_id = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|payload| receipt_id(&payload));
        debug!(instance_id, message_id = ?message_id, "Gateway accepted message");

        Ok(DeliveryReceipt {
            message_id,
            sent_at: Utc::now(),
        })
    }
}

/// Message id from `key.id`, falling back to a top-level `id`.
fn receipt_id(payload: &Value) -> Option<String> {
    payload
        .pointer("/key/id")
        .or_else(|| payload.get("id"))
        .and_then(Value::as_str)
        .map(String::from)
}
