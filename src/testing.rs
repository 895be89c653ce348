//! Test doubles for the pipeline's collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::agents::model::{ActivationRule, AgentProfile};
use crate::error::{DatabaseError, GatewayError};
use crate::gateway::{DeliveryReceipt, MessagingGatewayClient};
use crate::store::AgentConfigStore;

/// A message handed to [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub instance_id: String,
    pub conversation_id: String,
    pub text: String,
}

/// Gateway that records sends instead of delivering them.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<SentMessage>>,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    attempts: AtomicUsize,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send waits `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fail the next `n` sends.
    pub async fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Successfully delivered messages.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Send attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingGatewayClient for RecordingGateway {
    async fn send(
        &self,
        instance_id: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<DeliveryReceipt, GatewayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(GatewayError::Rejected {
                status: 503,
                body: "instance disconnected".into(),
            });
        }

        let mut sent = self.sent.lock().await;
        sent.push(SentMessage {
            instance_id: instance_id.to_string(),
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
        });
        Ok(DeliveryReceipt {
            message_id: Some(format!("sent-{}", sent.len())),
            sent_at: Utc::now(),
        })
    }
}

/// Agent store wrapper counting how often the selection paths hit it.
pub struct CountingAgentStore {
    inner: Arc<dyn AgentConfigStore>,
    profile_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl CountingAgentStore {
    pub fn new(inner: Arc<dyn AgentConfigStore>) -> Self {
        Self {
            inner,
            profile_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Calls to `get_agent_profile`.
    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    /// Calls to `list_active_agents` and `list_activation_rules`.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentConfigStore for CountingAgentStore {
    async fn get_agent_profile(&self, id: &str) -> Result<Option<AgentProfile>, DatabaseError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_agent_profile(id).await
    }

    async fn list_active_agents(&self) -> Result<Vec<AgentProfile>, DatabaseError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_active_agents().await
    }

    async fn list_activation_rules(
        &self,
        instance_id: Option<&str>,
    ) -> Result<Vec<ActivationRule>, DatabaseError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_activation_rules(instance_id).await
    }
}
