//! `DeliveryStatusStore`: async interface for per-sender delivery status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// Whether the backend has answered a contact yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub sender_identity: String,
    pub responded: bool,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic delivery status store, keyed by sender identity.
#[async_trait]
pub trait DeliveryStatusStore: Send + Sync {
    /// Register a contact we have messaged. Existing rows are left untouched.
    async fn register_sent(&self, sender_identity: &str) -> Result<(), DatabaseError>;

    /// Flag that a response for this sender was admitted.
    ///
    /// Returns `false` when the sender was never registered (nothing updated).
    async fn mark_responded(&self, sender_identity: &str) -> Result<bool, DatabaseError>;

    /// Current status, or `None` for an unknown sender.
    async fn get_status(
        &self,
        sender_identity: &str,
    ) -> Result<Option<DeliveryStatus>, DatabaseError>;

    /// `true` once a response was admitted for this sender.
    async fn is_responded(&self, sender_identity: &str) -> Result<bool, DatabaseError> {
        Ok(self
            .get_status(sender_identity)
            .await?
            .is_some_and(|s| s.responded))
    }
}

/// Persistent `username → chat id` map for chat networks that can only
/// address users by numeric id.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// Insert or update the chat id for `username`.
    async fn save_chat(&self, username: &str, chat_id: i64) -> Result<(), DatabaseError>;

    async fn find_chat(&self, username: &str) -> Result<Option<i64>, DatabaseError>;
}
