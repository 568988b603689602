//! SQLite database for blob and tag metadata.

use std::path::Path;

use common::descriptor::{Descriptor, Digest};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Row,
};

use crate::error::{ObjectStoreError, Result};

/// Blob metadata stored in SQLite.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub(crate) struct BlobMetadata {
    pub digest: String,
    pub size: i64,
    pub media_type: Option<String>,
    pub created_at: i64,
}

/// SQLite database connection pool.
#[derive(Debug, Clone)]
pub(crate) struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from a file path.
    pub async fn new(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Wal);

        // a single connection that never gets recycled, or the database goes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Record a stored blob. Returns false if the digest was already recorded.
    pub async fn insert_blob(
        &self,
        digest: &Digest,
        size: i64,
        media_type: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO blobs (digest, size, media_type, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(digest) DO NOTHING
            "#,
        )
        .bind(digest.to_string())
        .bind(size)
        .bind(media_type)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get blob metadata by digest.
    pub async fn get_blob(&self, digest: &Digest) -> Result<Option<BlobMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT digest, size, media_type, created_at
            FROM blobs
            WHERE digest = ?
            "#,
        )
        .bind(digest.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| BlobMetadata {
            digest: r.get("digest"),
            size: r.get("size"),
            media_type: r.get("media_type"),
            created_at: r.get("created_at"),
        }))
    }

    /// Check if a blob exists.
    pub async fn has_blob(&self, digest: &Digest) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM blobs WHERE digest = ?
            "#,
        )
        .bind(digest.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Point a reference at a descriptor, replacing any previous target.
    pub async fn upsert_tag(&self, reference: &str, desc: &Descriptor) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let encoded = serde_json::to_string(desc)?;
        sqlx::query(
            r#"
            INSERT INTO tags (reference, digest, descriptor, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(reference) DO UPDATE SET
                digest = excluded.digest,
                descriptor = excluded.descriptor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(reference)
        .bind(desc.digest().to_string())
        .bind(encoded)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a blob, if new, and point a reference at it in one transaction.
    pub async fn insert_blob_and_tag(
        &self,
        desc: &Descriptor,
        reference: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let digest = desc.digest().to_string();
        let encoded = serde_json::to_string(desc)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO blobs (digest, size, media_type, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(digest) DO NOTHING
            "#,
        )
        .bind(digest.as_str())
        .bind(desc.size())
        .bind(desc.media_type())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO tags (reference, digest, descriptor, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(reference) DO UPDATE SET
                digest = excluded.digest,
                descriptor = excluded.descriptor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(reference)
        .bind(digest.as_str())
        .bind(encoded)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Look up the descriptor a reference points at.
    pub async fn get_tag(&self, reference: &str) -> Result<Option<Descriptor>> {
        let row = sqlx::query(
            r#"
            SELECT descriptor FROM tags WHERE reference = ?
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let encoded: String = row.get("descriptor");
        let desc = serde_json::from_str(&encoded).map_err(|source| ObjectStoreError::CorruptTag {
            reference: reference.to_string(),
            source,
        })?;
        Ok(Some(desc))
    }

    /// List all references, sorted.
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT reference FROM tags ORDER BY reference
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("reference")).collect())
    }
}

#[cfg(test)]
impl Database {
    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Count blobs.
    pub async fn count_blobs(&self) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM blobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }

    /// Get total size of all blobs.
    pub async fn total_size(&self) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(size), 0) as total FROM blobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }
}
