use async_trait::async_trait;
use libsql::params;

use super::migrations::unix_now;
use crate::dispatch::{Recipient, RecipientStore};
use crate::error::StoreError;
use crate::pool::{LibsqlManager, LibsqlPool};

/// SQLite-backed subscriber list
pub struct SubscriberRepository {
    pool: LibsqlPool,
}

impl SubscriberRepository {
    /// Create a new repository from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl RecipientStore for SubscriberRepository {
    async fn add_recipient(&self, recipient: &str) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO chat_ids (chat_id, subscribed_at) VALUES (?, ?)",
            params![recipient, unix_now()],
        )
        .await?;
        Ok(())
    }

    async fn remove_recipient(&self, recipient: &str) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM chat_ids WHERE chat_id = ?", params![recipient]).await?;
        Ok(())
    }

    async fn list_recipients(&self) -> Result<Vec<Recipient>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT chat_id FROM chat_ids ORDER BY subscribed_at, rowid", ())
            .await?;

        let mut recipients = Vec::new();
        while let Some(row) = rows.next().await? {
            recipients.push(row.get::<String>(0)?);
        }

        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::pool::open_local;
    use anyhow::Result;
    use tempfile::{TempDir, tempdir};

    async fn create_test_repository() -> Result<(SubscriberRepository, TempDir)> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let pool = open_local(&db_path.to_string_lossy()).await?;

        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        initialize_database(&conn).await?;
        drop(conn);

        Ok((SubscriberRepository::new_from_pool(pool), temp_dir))
    }

    #[tokio::test]
    async fn test_subscribe_and_list() -> Result<()> {
        let (repo, _dir) = create_test_repository().await?;

        repo.add_recipient("100").await?;
        repo.add_recipient("-200").await?;
        repo.add_recipient("300").await?;

        assert_eq!(repo.list_recipients().await?, vec!["100", "-200", "300"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_twice_is_idempotent() -> Result<()> {
        let (repo, _dir) = create_test_repository().await?;

        repo.add_recipient("42").await?;
        repo.add_recipient("42").await?;

        assert_eq!(repo.list_recipients().await?, vec!["42"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unsubscribe() -> Result<()> {
        let (repo, _dir) = create_test_repository().await?;

        repo.add_recipient("1").await?;
        repo.add_recipient("2").await?;
        repo.remove_recipient("1").await?;
        repo.remove_recipient("not-there").await?;

        assert_eq!(repo.list_recipients().await?, vec!["2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_store() -> Result<()> {
        let (repo, _dir) = create_test_repository().await?;
        assert!(repo.list_recipients().await?.is_empty());
        Ok(())
    }
}
