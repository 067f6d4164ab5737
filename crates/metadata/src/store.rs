//! Document store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{CheckpointRow, CollectionInfo, DocumentRow};
use crate::repos::{CheckpointRepo, DocumentRepo};
use async_trait::async_trait;
use larder_core::{PackageDocument, Sequence};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// A document collection: one mirror of the registry.
#[async_trait]
pub trait DocumentStore: DocumentRepo + CheckpointRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Flush and close. Further calls fail.
    async fn close(&self);
}

/// SQLite-backed document collection.
pub struct SqliteDocumentStore {
    name: String,
    pool: Pool<Sqlite>,
}

impl SqliteDocumentStore {
    /// Open (creating if needed) the collection stored at `path`.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One writer keeps revision checks and sequence bumps serialised.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            name: name.into(),
            pool,
        };
        store.migrate().await?;
        tracing::debug!(collection = %store.name, path = %path.display(), "document store opened");
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Revision strings look like `{generation}-{digest}`, where the digest
/// covers the stored body.
fn make_revision(generation: i64, body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    format!("{generation}-{}", &hex::encode(digest)[..32])
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!(collection = %self.name, "document store closed");
    }
}

#[async_trait]
impl DocumentRepo for SqliteDocumentStore {
    async fn get(&self, name: &str) -> MetadataResult<PackageDocument> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT name, generation, revision, body, seq, updated_at FROM documents WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| MetadataError::NotFound(name.to_string()))?;
        let mut doc = PackageDocument::from_slice(row.body.as_bytes())?;
        doc.revision = Some(row.revision);
        Ok(doc)
    }

    async fn put(&self, doc: &PackageDocument) -> MetadataResult<String> {
        if doc.name.is_empty() {
            return Err(MetadataError::Internal(
                "document without a name".to_string(),
            ));
        }

        let body = serde_json::to_string(&doc.clone().without_revision())
            .map_err(|e| MetadataError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let current: Option<(i64, String)> =
            sqlx::query_as("SELECT generation, revision FROM documents WHERE name = ?")
                .bind(&doc.name)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(expected) = &doc.revision {
            let current_rev = current.as_ref().map(|(_, rev)| rev.as_str());
            if current_rev != Some(expected.as_str()) {
                return Err(MetadataError::Conflict {
                    name: doc.name.clone(),
                    expected: expected.clone(),
                    current: current_rev.unwrap_or("none").to_string(),
                });
            }
        }

        let generation = current.map_or(1, |(generation, _)| generation + 1);
        let revision = make_revision(generation, &body);

        sqlx::query("UPDATE collection_meta SET update_seq = update_seq + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        let seq: i64 = sqlx::query_scalar("SELECT update_seq FROM collection_meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO documents (name, generation, revision, body, seq, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                generation = excluded.generation,
                revision = excluded.revision,
                body = excluded.body,
                seq = excluded.seq,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.name)
        .bind(generation)
        .bind(&revision)
        .bind(&body)
        .bind(seq)
        .bind(OffsetDateTime::now_utc())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(revision)
    }

    async fn delete(&self, name: &str) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM documents WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let existed = result.rows_affected() > 0;
        if existed {
            sqlx::query("UPDATE collection_meta SET update_seq = update_seq + 1 WHERE id = 1")
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(existed)
    }

    async fn info(&self) -> MetadataResult<CollectionInfo> {
        let doc_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let update_seq: i64 =
            sqlx::query_scalar("SELECT update_seq FROM collection_meta WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(CollectionInfo {
            name: self.name.clone(),
            doc_count: doc_count.max(0) as u64,
            update_seq: update_seq.max(0) as u64,
        })
    }
}

#[async_trait]
impl CheckpointRepo for SqliteDocumentStore {
    async fn checkpoint(&self, source: &str) -> MetadataResult<Option<Sequence>> {
        let row: Option<CheckpointRow> =
            sqlx::query_as("SELECT source, seq, updated_at FROM checkpoints WHERE source = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|row| Sequence::new(row.seq)))
    }

    async fn set_checkpoint(&self, source: &str, seq: &Sequence) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, seq, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET seq = excluded.seq, updated_at = excluded.updated_at
            "#,
        )
        .bind(source)
        .bind(seq.as_str())
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    name TEXT PRIMARY KEY,
    generation INTEGER NOT NULL,
    revision TEXT NOT NULL,
    body TEXT NOT NULL,
    seq INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_seq ON documents(seq);

CREATE TABLE IF NOT EXISTS checkpoints (
    source TEXT PRIMARY KEY,
    seq TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    update_seq INTEGER NOT NULL
);
INSERT OR IGNORE INTO collection_meta (id, update_seq) VALUES (1, 0);
"#;
