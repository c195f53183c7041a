//! Response receiver: HTTP endpoint admitting backend responses into a queue.
//!
//! Leaf and central deployments share one implementation; the role decides
//! the route and which fields are required.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Role;
use crate::error::ReceiverError;
use crate::record::ResponseRecord;
use crate::relay::RelayQueue;
use crate::store::DeliveryStatusStore;

/// Validates payloads and enqueues them as records.
pub struct ResponseReceiver {
    role: Role,
    /// Routing key of this service; tags leaf records that arrive without one.
    local_routing_key: String,
    queue: Arc<RelayQueue>,
    status: Option<Arc<dyn DeliveryStatusStore>>,
}

impl ResponseReceiver {
    /// Receiver for a leaf service: requires `{senderIdentity, text}`.
    pub fn leaf(
        local_routing_key: impl Into<String>,
        queue: Arc<RelayQueue>,
        status: Option<Arc<dyn DeliveryStatusStore>>,
    ) -> Self {
        Self {
            role: Role::Leaf,
            local_routing_key: local_routing_key.into(),
            queue,
            status,
        }
    }

    /// Receiver for the central dispatcher: also requires `routingKey`.
    pub fn central(queue: Arc<RelayQueue>) -> Self {
        Self {
            role: Role::Central,
            local_routing_key: String::new(),
            queue,
            status: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// URL path this receiver is mounted on.
    pub fn path(&self) -> &'static str {
        match self.role {
            Role::Leaf => "/process-response",
            Role::Central => "/response-webhook",
        }
    }

    /// Validate `payload` and admit it. Nothing is mutated on a validation error.
    pub async fn handle(&self, payload: &Value) -> Result<ResponseRecord, ReceiverError> {
        let record = self.validate(payload)?;

        info!(
            role = self.role.as_str(),
            record_id = %record.id,
            routing_key = %record.routing_key,
            sender = %record.sender_identity,
            text = %record.text,
            "Response received"
        );

        if let Some(status) = &self.status {
            match status.mark_responded(&record.sender_identity).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(sender = %record.sender_identity, "No delivery status row for sender")
                }
                Err(e) => warn!(
                    sender = %record.sender_identity,
                    error = %e,
                    "Failed to update delivery status"
                ),
            }
        }

        self.queue
            .enqueue(record.clone())
            .await
            .map_err(|_| ReceiverError::Internal("response queue is shut down".into()))?;

        Ok(record)
    }

    fn validate(&self, payload: &Value) -> Result<ResponseRecord, ReceiverError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| ReceiverError::Invalid("body is not a JSON object".into()))?;

        let field = |names: &[&str]| -> Result<Option<String>, ReceiverError> {
            match names.iter().find_map(|n| obj.get(*n)) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(ReceiverError::Invalid(format!("{} must be a string", names[0]))),
            }
        };

        let sender_identity = field(&["senderIdentity", "username"])?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ReceiverError::Invalid("missing senderIdentity".into()))?;
        let text = field(&["text"])?.ok_or_else(|| ReceiverError::Invalid("missing text".into()))?;
        let routing_key = field(&["routingKey", "script_number"])?.filter(|s| !s.trim().is_empty());

        let routing_key = match (self.role, routing_key) {
            (_, Some(key)) => key,
            (Role::Leaf, None) => self.local_routing_key.clone(),
            (Role::Central, None) => {
                return Err(ReceiverError::Invalid("missing routingKey".into()));
            }
        };

        Ok(ResponseRecord::new(routing_key, sender_identity, text))
    }
}

impl IntoResponse for ReceiverError {
    fn into_response(self) -> Response {
        match self {
            ReceiverError::Invalid(_) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid data"})),
            )
                .into_response(),
            ReceiverError::Internal(reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": reason})),
            )
                .into_response(),
        }
    }
}

/// POST handler: parse the body ourselves so malformed JSON maps to our 400.
async fn receive(State(receiver): State<Arc<ResponseReceiver>>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Malformed response body");
            return ReceiverError::Invalid(e.to_string()).into_response();
        }
    };

    match receiver.handle(&payload).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "processed"})),
        )
            .into_response(),
        Err(e) => {
            warn!(role = receiver.role.as_str(), error = %e, "Response rejected");
            e.into_response()
        }
    }
}

async fn health(State(receiver): State<Arc<ResponseReceiver>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "role": receiver.role.as_str(),
        "queued": receiver.queue.len().await,
    }))
}

/// Build the receiver router: the role's POST route plus `GET /health`.
pub fn receiver_routes(receiver: Arc<ResponseReceiver>) -> Router {
    Router::new()
        .route(receiver.path(), post(receive))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(receiver)
}
