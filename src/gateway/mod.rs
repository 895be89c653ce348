//! Messaging gateway boundary: outbound sends and the inbound webhook.

pub mod http;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub use http::HttpGatewayClient;
pub use webhook::{WebhookState, webhook_routes};

/// Proof that the gateway accepted an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Gateway-assigned id of the sent message, when reported.
    pub message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Sends text replies into a conversation.
#[async_trait]
pub trait MessagingGatewayClient: Send + Sync {
    async fn send(
        &self,
        instance_id: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<DeliveryReceipt, GatewayError>;
}
