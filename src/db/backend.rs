//! Persistence boundary
//!
//! Record stores talk to a `DocumentBackend` addressed by collection name,
//! using MongoDB's query dialect for filters and updates. Two
//! implementations exist: `MongoClient` for production and `MemoryBackend`
//! for dev mode and tests.

use async_trait::async_trait;
use bson::Document;
use mongodb::options::IndexOptions;

use crate::db::join::LeftJoin;
use crate::db::view::FindView;
use crate::types::Result;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Counts reported by an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCounts {
    pub matched: u64,
    pub modified: u64,
}

/// Whether a write targets the first match or every match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteScope {
    One,
    Many,
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Short backend name for logs and health output
    fn kind(&self) -> &'static str;

    /// Create the given indexes on a collection
    async fn ensure_indexes(
        &self,
        collection: &str,
        indexes: Vec<(Document, Option<IndexOptions>)>,
    ) -> Result<()>;

    async fn find(&self, collection: &str, filter: Document, view: FindView)
        -> Result<Vec<Document>>;

    /// Insert documents, returning how many were stored
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<u64>;

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        scope: WriteScope,
    ) -> Result<UpdateCounts>;

    /// Delete matching documents, returning how many were removed
    async fn delete(&self, collection: &str, filter: Document, scope: WriteScope) -> Result<u64>;

    /// Left-join `collection` against `join.from`, then filter and apply the view
    async fn left_join(
        &self,
        collection: &str,
        join: &LeftJoin,
        filter: Document,
        view: FindView,
    ) -> Result<Vec<Document>>;
}
