//! Execution gate and dispatcher.
//!
//! Runs the assigned agent and sends its reply only when the model's
//! confidence is strictly above the dispatch threshold. Both the model call
//! and the send are bounded by timeouts, and a reply is sent at most once:
//! a failed send is recorded, never retried here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::agents::model::AgentProfile;
use crate::config::PipelineConfig;
use crate::error::{GatewayError, LlmError, PipelineError};
use crate::executions::model::{ExecutionResult, ExecutionStatus};
use crate::gateway::MessagingGatewayClient;
use crate::llm::provider::{ChatMessage, Generation, LanguageModelService, Prompt};
use crate::pipeline::orchestrator::Assignment;
use crate::pipeline::types::{HistoryTurn, InboundMessage, TurnRole};
use crate::store::{ConversationLog, TicketStore};
use crate::tickets::model::Ticket;

pub struct Dispatcher {
    model: Arc<dyn LanguageModelService>,
    gateway: Arc<dyn MessagingGatewayClient>,
    tickets: Arc<dyn TicketStore>,
    history: Arc<dyn ConversationLog>,
    dispatch_threshold: f64,
    model_timeout: Duration,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        model: Arc<dyn LanguageModelService>,
        gateway: Arc<dyn MessagingGatewayClient>,
        tickets: Arc<dyn TicketStore>,
        history: Arc<dyn ConversationLog>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            model,
            gateway,
            tickets,
            history,
            dispatch_threshold: config.dispatch_threshold,
            model_timeout: config.model_timeout,
            send_timeout: config.send_timeout,
        }
    }

    /// Run `assignment` for `message` and gate the outbound send.
    ///
    /// Never fails: every problem ends up in the result's status and error.
    pub async fn execute(
        &self,
        ticket: &Ticket,
        assignment: &Assignment,
        message: &InboundMessage,
        history: &[HistoryTurn],
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut result = ExecutionResult::skipped(&message.id, ticket.id, &message.text, "");
        result.agent_id = Some(assignment.agent.id.clone());
        result.rule_id = assignment.rule_id.clone();
        result.strategy = assignment.strategy;
        result.error = None;

        let prompt = build_prompt(&assignment.agent, history, message);
        let generation = match self.generate(&assignment.agent, &prompt).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    agent_id = %assignment.agent.id,
                    error = %e,
                    "Agent execution failed"
                );
                result.status = ExecutionStatus::Error;
                result.error = Some(e.to_string());
                result.execution_time_ms = elapsed_ms(started);
                return result;
            }
        };

        result.output = generation.text.clone();
        result.confidence = generation.confidence;
        result.tokens_used = generation.tokens_used;

        if generation.confidence <= self.dispatch_threshold {
            info!(
                message_id = %message.id,
                agent_id = %assignment.agent.id,
                confidence = generation.confidence,
                threshold = self.dispatch_threshold,
                "Reply held back by confidence gate"
            );
            result.status = ExecutionStatus::LowConfidence;
            result.execution_time_ms = elapsed_ms(started);
            return result;
        }

        match self.send(ticket, &generation.text).await {
            Ok(receipt) => {
                info!(
                    message_id = %message.id,
                    ticket_id = %ticket.id,
                    agent_id = %assignment.agent.id,
                    confidence = generation.confidence,
                    "Reply dispatched"
                );
                result.status = ExecutionStatus::Success;
                result.delivery = Some(receipt);
                self.record_reply(ticket, &result).await;
            }
            Err(e) => {
                // The text stays in the result for a manual resend
                warn!(
                    message_id = %message.id,
                    ticket_id = %ticket.id,
                    error = %e,
                    "Dispatch failed, reply not resent"
                );
                result.status = ExecutionStatus::Error;
                result.error = Some(PipelineError::Dispatch(e).to_string());
            }
        }

        result.execution_time_ms = elapsed_ms(started);
        result
    }

    async fn generate(&self, agent: &AgentProfile, prompt: &Prompt) -> Result<Generation, PipelineError> {
        let call = self
            .model
            .generate(prompt, &agent.model_params, self.model_timeout);
        match tokio::time::timeout(self.model_timeout, call).await {
            Err(_) | Ok(Err(LlmError::Timeout { .. })) => {
                Err(PipelineError::ModelTimeout(self.model_timeout))
            }
            Ok(Err(e)) => Err(PipelineError::Model(e)),
            Ok(Ok(mut generation)) => {
                generation.confidence = if generation.confidence.is_finite() {
                    generation.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                Ok(generation)
            }
        }
    }

    async fn send(
        &self,
        ticket: &Ticket,
        text: &str,
    ) -> Result<crate::gateway::DeliveryReceipt, GatewayError> {
        let send = self
            .gateway
            .send(&ticket.instance_id, &ticket.conversation_id, text);
        tokio::time::timeout(self.send_timeout, send)
            .await
            .map_err(|_| GatewayError::Timeout {
                instance: ticket.instance_id.clone(),
                timeout: self.send_timeout,
            })?
    }

    /// Bookkeeping after a delivered reply. Failures are logged only; the
    /// customer already has the message.
    async fn record_reply(&self, ticket: &Ticket, result: &ExecutionResult) {
        let turn = HistoryTurn::agent(result.execution_id.to_string(), result.output.clone());
        if let Err(e) = self.history.append_turn(ticket.id, &turn).await {
            warn!(ticket_id = %ticket.id, error = %e, "Failed to record agent turn");
        }
        if let Err(e) = self.tickets.record_ai_interaction(ticket.id).await {
            warn!(ticket_id = %ticket.id, error = %e, "Failed to count AI interaction");
        }
    }
}

/// System prompt from the agent template, then history, then the message.
pub fn build_prompt(agent: &AgentProfile, history: &[HistoryTurn], message: &InboundMessage) -> Prompt {
    let mut messages = Vec::with_capacity(history.len() + 2);

    let mut system = agent.prompt_template.trim().to_string();
    if let Some(name) = &message.sender_name {
        system.push_str(&format!("\n\nThe customer's name is {name}."));
    }
    messages.push(ChatMessage::system(system));

    for turn in history.iter().filter(|t| t.message_id != message.id) {
        messages.push(match turn.role {
            TurnRole::Customer => ChatMessage::user(&turn.text),
            TurnRole::Agent => ChatMessage::assistant(&turn.text),
        });
    }

    let current = if message.text.trim().is_empty() {
        format!("[{} without text]", message.kind.as_str())
    } else {
        message.text.clone()
    };
    messages.push(ChatMessage::user(current));

    Prompt::new(messages)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
