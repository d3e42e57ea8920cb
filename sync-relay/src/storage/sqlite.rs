//! SQLite topic store.

use super::{value_digest, TopicStore, ValueDigest};
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-backed topic store.
///
/// Uses WAL mode for concurrent reads/writes. Each row carries the digest of
/// its value so loading a topic index never reads values.
#[derive(Clone)]
pub struct SqliteTopicStore {
    pool: SqlitePool,
}

impl SqliteTopicStore {
    /// Open a store at `path`, creating the database if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let url = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(url)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // a second connection would open a second, empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                topic TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                digest BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (topic, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl TopicStore for SqliteTopicStore {
    async fn load_index(&self, topic: &str) -> Result<HashMap<Vec<u8>, ValueDigest>, StorageError> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> =
            sqlx::query_as("SELECT key, digest FROM records WHERE topic = ?1")
                .bind(topic)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        rows.into_iter()
            .map(|(key, digest)| {
                let digest = ValueDigest::try_from(digest.as_slice()).map_err(|_| {
                    StorageError::CorruptRow {
                        topic: topic.to_string(),
                        reason: format!("digest is {} bytes", digest.len()),
                    }
                })?;
                Ok((key, digest))
            })
            .collect()
    }

    async fn put(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let digest = value_digest(value);

        sqlx::query(
            r#"
            INSERT INTO records (topic, key, value, digest, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(topic, key) DO UPDATE
                SET value = ?3, digest = ?4, updated_at = ?5
            "#,
        )
        .bind(topic)
        .bind(key)
        .bind(value)
        .bind(digest.as_slice())
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn delete(&self, topic: &str, key: &[u8]) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM records WHERE topic = ?1 AND key = ?2")
            .bind(topic)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn get(&self, topic: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        sqlx::query_scalar("SELECT value FROM records WHERE topic = ?1 AND key = ?2")
            .bind(topic)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)
    }

    async fn count(&self, topic: &str) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE topic = ?1")
            .bind(topic)
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}
