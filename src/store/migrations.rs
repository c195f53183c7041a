//! Schema setup for the status database.
//!
//! The schema version lives in SQLite's `user_version` pragma. Steps above the
//! stored version are applied in order on open.

use libsql::Connection;
use tracing::info;

use crate::error::DatabaseError;

/// `(version, statements)`; append new steps at the end.
const SCHEMA_STEPS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS sent_messages (
            username TEXT PRIMARY KEY,
            responded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            responded_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sent_messages_responded ON sent_messages(responded);",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS chats (
            username TEXT PRIMARY KEY,
            chat_id INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );",
    ),
];

/// Bring the schema up to date. Safe to call on every open.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let stored = schema_version(conn).await?;

    for &(version, sql) in SCHEMA_STEPS.iter().filter(|(v, _)| *v > stored) {
        info!(version, "Upgrading status schema");
        // PRAGMA does not take bound parameters; `version` is a constant.
        let batch = format!("BEGIN; {sql} PRAGMA user_version = {version}; COMMIT;");
        conn.execute_batch(&batch)
            .await
            .map_err(|e| DatabaseError::Migration(format!("schema step {version}: {e}")))?;
    }

    Ok(())
}

/// Currently stored schema version (0 for a fresh database).
pub async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("PRAGMA user_version", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read user_version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("parse user_version: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!("read user_version: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                libsql::params![name],
            )
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        count == 1
    }

    #[tokio::test]
    async fn fresh_database_gets_all_tables() {
        let conn = fresh_conn().await;
        assert_eq!(schema_version(&conn).await.unwrap(), 0);

        run_migrations(&conn).await.unwrap();

        assert!(table_exists(&conn, "sent_messages").await);
        assert!(table_exists(&conn, "chats").await);
        assert_eq!(schema_version(&conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn version_one_database_is_upgraded() {
        let conn = fresh_conn().await;
        let (_, v1) = SCHEMA_STEPS[0];
        conn.execute_batch(&format!("{v1} PRAGMA user_version = 1;"))
            .await
            .unwrap();
        assert!(!table_exists(&conn, "chats").await);

        run_migrations(&conn).await.unwrap();

        assert!(table_exists(&conn, "chats").await);
        assert_eq!(schema_version(&conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rerun_keeps_rows() {
        let conn = fresh_conn().await;
        run_migrations(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO sent_messages (username, created_at) VALUES ('alice', 'now')",
            (),
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        let mut rows = conn.query("SELECT COUNT(*) FROM sent_messages", ()).await.unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
    }
}
