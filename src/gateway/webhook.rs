//! Inbound webhook routes.
//!
//! Events are normalized inline so malformed payloads get a 400, then the
//! pipeline runs in a spawned task and the gateway is acknowledged at once.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::pipeline::normalizer;
use crate::pipeline::processor::MessageProcessor;

/// Shared state for webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<MessageProcessor>,
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// POST /webhook/{instance_id}
///
/// Accepts a single event object or an array of them.
async fn receive_event(
    State(state): State<WebhookState>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(instance_id = %instance_id, error = %e, "Webhook body is not JSON");
            return bad_request(format!("invalid JSON: {e}"));
        }
    };

    if let Value::Array(events) = value {
        let count = events.len();
        tokio::spawn(async move {
            state.processor.handle_batch(&instance_id, &events).await;
        });
        return (StatusCode::ACCEPTED, Json(json!({ "status": "accepted", "count": count }))).into_response();
    }

    let event = match normalizer::normalize_value(&instance_id, &value) {
        Ok(event) => event,
        Err(e) => {
            warn!(instance_id = %instance_id, error = %e, "Rejecting malformed event");
            return bad_request(e.to_string());
        }
    };

    let message_id = event.message().id.clone();
    let from_self = event.message().from_self;

    // The gateway is acked before the pipeline runs, so a retryable failure
    // (storage down before the ticket exists) is logged and dropped here.
    // Nothing is audited for it and the gateway will not redeliver.
    tokio::spawn(async move {
        if let Err(e) = state.processor.handle_event(event).await {
            error!(
                instance_id = %instance_id,
                error = %e,
                retryable = e.is_retryable(),
                "Pipeline failed for accepted event"
            );
        }
    });

    if from_self {
        return (StatusCode::OK, Json(json!({ "status": "ignored", "message_id": message_id }))).into_response();
    }
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted", "message_id": message_id }))).into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Build the webhook routes.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/{instance_id}", post(receive_event))
        .route("/health", get(health))
        .with_state(state)
}
