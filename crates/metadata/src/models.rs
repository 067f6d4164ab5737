//! Database models mapping to the document schema.

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// A stored document.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub name: String,
    pub generation: i64,
    pub revision: String,
    /// JSON body without the revision marker.
    pub body: String,
    /// Collection sequence at the last write.
    pub seq: i64,
    pub updated_at: OffsetDateTime,
}

/// A replication cursor.
#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    pub source: String,
    pub seq: String,
    pub updated_at: OffsetDateTime,
}

/// Summary of a document collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub doc_count: u64,
    /// Incremented on every write or delete.
    pub update_seq: u64,
}
