//! Persistence layer: SQLite-backed delivery status tracking.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStatusStore;
pub use traits::{ChatDirectory, DeliveryStatus, DeliveryStatusStore};
