/// Subscriber persistence
///
/// Chat identifiers live in a local SQLite file accessed through libsql.
pub mod migrations;
pub mod repository;

pub use repository::SubscriberRepository;

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
