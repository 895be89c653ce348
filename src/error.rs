//! Error types for Agent Dispatch.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Messaging gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to send message on instance {instance}: {reason}")]
    SendFailed { instance: String, reason: String },

    #[error("Gateway rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Send to instance {instance} timed out after {timeout:?}")]
    Timeout { instance: String, timeout: Duration },

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Language-model service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Pipeline errors.
///
/// Only `MalformedEvent`, `NoTicket` and `Storage` ever escape
/// `handle_inbound_event`; the rest are folded into an audited terminal state.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed gateway event: {0}")]
    MalformedEvent(String),

    #[error("Ticket unavailable for conversation {conversation_id}: {source}")]
    NoTicket {
        conversation_id: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Model call timed out after {0:?}")]
    ModelTimeout(Duration),

    #[error("Model error: {0}")]
    Model(#[from] LlmError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] GatewayError),
}

impl PipelineError {
    /// Whether the transport should redeliver the event.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoTicket { .. } | Self::Storage(_))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
