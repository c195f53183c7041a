//! The routed message record shared by the dispatcher, receivers and relay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message tagged with the routing key of the service it belongs to.
///
/// Used both for outbound dispatches to the automation backend and for the
/// responses coming back through the relay. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    /// Process-local id for log correlation. Not part of the wire format.
    #[serde(skip, default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(alias = "script_number")]
    pub routing_key: String,
    #[serde(alias = "username")]
    pub sender_identity: String,
    pub text: String,
}

impl ResponseRecord {
    pub fn new(
        routing_key: impl Into<String>,
        sender_identity: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            routing_key: routing_key.into(),
            sender_identity: sender_identity.into(),
            text: text.into(),
        }
    }
}
