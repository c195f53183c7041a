//! libSQL backend: async `DeliveryStatusStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ChatDirectory, DeliveryStatus, DeliveryStatusStore};

/// libSQL delivery status store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlStatusStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStatusStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Status database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Parse an RFC 3339 string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_status(row: &libsql::Row) -> Result<DeliveryStatus, libsql::Error> {
    let sender_identity: String = row.get(0)?;
    let responded: i64 = row.get(1)?;
    let created_at: String = row.get(2)?;
    let responded_at: Option<String> = row.get(3).ok();

    Ok(DeliveryStatus {
        sender_identity,
        responded: responded != 0,
        created_at: parse_datetime(&created_at),
        responded_at: responded_at.as_deref().map(parse_datetime),
    })
}

#[async_trait]
impl DeliveryStatusStore for LibSqlStatusStore {
    async fn register_sent(&self, sender_identity: &str) -> Result<(), DatabaseError> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO sent_messages (username, responded, created_at)
                 VALUES (?1, 0, ?2)
                 ON CONFLICT (username) DO NOTHING",
                params![sender_identity, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("register_sent: {e}")))?;

        debug!(sender = sender_identity, inserted, "Contact registered");
        Ok(())
    }

    async fn mark_responded(&self, sender_identity: &str) -> Result<bool, DatabaseError> {
        let updated = self
            .conn
            .execute(
                "UPDATE sent_messages SET responded = 1, responded_at = ?1 WHERE username = ?2",
                params![Utc::now().to_rfc3339(), sender_identity],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_responded: {e}")))?;

        debug!(sender = sender_identity, updated, "Delivery status updated");
        Ok(updated > 0)
    }

    async fn get_status(
        &self,
        sender_identity: &str,
    ) -> Result<Option<DeliveryStatus>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT username, responded, created_at, responded_at
                 FROM sent_messages WHERE username = ?1",
                params![sender_identity],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_status: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_status(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_status row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_status: {e}"))),
        }
    }
}

#[async_trait]
impl ChatDirectory for LibSqlStatusStore {
    async fn save_chat(&self, username: &str, chat_id: i64) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO chats (username, chat_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (username) DO UPDATE
                 SET chat_id = excluded.chat_id, updated_at = excluded.updated_at",
                params![username, chat_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_chat: {e}")))?;
        debug!(username, chat_id, "Chat id saved");
        Ok(())
    }

    async fn find_chat(&self, username: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT chat_id FROM chats WHERE username = ?1",
                params![username],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_chat: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("find_chat row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_chat: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlStatusStore {
        LibSqlStatusStore::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn unknown_sender_has_no_status() {
        let db = test_db().await;
        assert!(db.get_status("nobody").await.unwrap().is_none());
        assert!(!db.is_responded("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn register_then_respond() {
        let db = test_db().await;
        db.register_sent("alice").await.unwrap();

        let status = db.get_status("alice").await.unwrap().unwrap();
        assert!(!status.responded);
        assert!(status.responded_at.is_none());

        assert!(!db.is_responded("alice").await.unwrap());
        assert!(db.mark_responded("alice").await.unwrap());
        assert!(db.is_responded("alice").await.unwrap());
        let status = db.get_status("alice").await.unwrap().unwrap();
        assert!(status.responded);
        assert!(status.responded_at.is_some());
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let db = test_db().await;
        db.register_sent("alice").await.unwrap();
        db.mark_responded("alice").await.unwrap();

        // A second registration must not reset the flag.
        db.register_sent("alice").await.unwrap();
        assert!(db.get_status("alice").await.unwrap().unwrap().responded);
    }

    #[tokio::test]
    async fn mark_unknown_sender_updates_nothing() {
        let db = test_db().await;
        assert!(!db.mark_responded("ghost").await.unwrap());
        assert!(db.get_status("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chat_ids_are_upserted() {
        let db = test_db().await;
        assert_eq!(db.find_chat("alice").await.unwrap(), None);

        db.save_chat("alice", 42).await.unwrap();
        assert_eq!(db.find_chat("alice").await.unwrap(), Some(42));

        db.save_chat("alice", 43).await.unwrap();
        assert_eq!(db.find_chat("alice").await.unwrap(), Some(43));
    }

    #[tokio::test]
    async fn local_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.db");

        {
            let db = LibSqlStatusStore::new_local(&path).await.unwrap();
            db.register_sent("bob").await.unwrap();
            db.save_chat("bob", 7).await.unwrap();
        }

        let db = LibSqlStatusStore::new_local(&path).await.unwrap();
        assert!(db.get_status("bob").await.unwrap().is_some());
        assert_eq!(db.find_chat("bob").await.unwrap(), Some(7));
    }
}
