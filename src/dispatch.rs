//! Outbound HTTP: posting routed records to webhooks.
//!
//! `Forwarder` posts a record to an arbitrary URL (used by the relay worker).
//! `Dispatcher` posts to the one backend endpoint configured for this
//! service (used by the aggregator). Neither retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::record::ResponseRecord;

/// Posts a record to a destination URL. Success means a 2xx response.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, url: &str, record: &ResponseRecord) -> Result<(), DispatchError>;
}

/// Sends an aggregated message to the automation backend.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        routing_key: &str,
        sender_identity: &str,
        text: &str,
    ) -> Result<(), DispatchError>;
}

/// JSON-over-HTTP forwarder backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Client(e.to_string()))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Forwarder for WebhookClient {
    async fn forward(&self, url: &str, record: &ResponseRecord) -> Result<(), DispatchError> {
        let resp = self
            .client
            .post(url)
            .json(record)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout {
                        url: url.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    DispatchError::Network {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        debug!(record_id = %record.id, url, status = status.as_u16(), "Record posted");
        Ok(())
    }
}

/// Dispatcher that posts to a fixed backend endpoint.
pub struct WebhookDispatcher {
    endpoint: String,
    forwarder: Arc<dyn Forwarder>,
}

impl WebhookDispatcher {
    pub fn new(endpoint: impl Into<String>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            endpoint: endpoint.into(),
            forwarder,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn dispatch(
        &self,
        routing_key: &str,
        sender_identity: &str,
        text: &str,
    ) -> Result<(), DispatchError> {
        let record = ResponseRecord::new(routing_key, sender_identity, text);
        match self.forwarder.forward(&self.endpoint, &record).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    sender = sender_identity,
                    routing_key,
                    error = %e,
                    "Dispatch to backend failed"
                );
                Err(e)
            }
        }
    }
}
