//! MongoDB client and document backend

use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::StreamExt;
use mongodb::{
    options::{FindOptions, IndexOptions},
    Client, Cursor, IndexModel,
};
use tracing::{debug, error, info};

use crate::db::backend::{DocumentBackend, UpdateCounts, WriteScope};
use crate::db::join::LeftJoin;
use crate::db::view::FindView;
use crate::types::{NexusError, Result};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB database '{}'", db_name);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| NexusError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection with timeout
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| NexusError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Drop the whole data database
    pub async fn drop_database(&self) -> Result<()> {
        self.database()
            .drop()
            .await
            .map_err(|e| NexusError::Database(format!("Drop failed: {}", e)))
    }

    fn database(&self) -> mongodb::Database {
        self.client.database(&self.db_name)
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database().collection::<Document>(name)
    }
}

/// Drain a cursor, logging and skipping unreadable documents
async fn collect_cursor(cursor: Cursor<Document>) -> Vec<Document> {
    cursor
        .filter_map(|doc| async {
            match doc {
                Ok(d) => Some(d),
                Err(e) => {
                    error!("Error reading document: {}", e);
                    None
                }
            }
        })
        .collect()
        .await
}

#[async_trait]
impl DocumentBackend for MongoClient {
    fn kind(&self) -> &'static str {
        "mongo"
    }

    async fn ensure_indexes(
        &self,
        collection: &str,
        indexes: Vec<(Document, Option<IndexOptions>)>,
    ) -> Result<()> {
        if indexes.is_empty() {
            return Ok(());
        }

        let models: Vec<IndexModel> = indexes
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.collection(collection)
            .create_indexes(models)
            .await
            .map_err(|e| NexusError::Database(format!("Failed to create indexes: {}", e)))?;

        debug!("Indexes applied to '{}'", collection);
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        view: FindView,
    ) -> Result<Vec<Document>> {
        let options = FindOptions::builder()
            .projection(view.projection)
            .sort(view.sort)
            .skip(view.skip)
            .limit(view.limit)
            .build();

        let cursor = self
            .collection(collection)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| NexusError::Database(format!("Find failed: {}", e)))?;

        Ok(collect_cursor(cursor).await)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<u64> {
        let target = self.collection(collection);

        if documents.len() == 1 {
            let mut documents = documents;
            if let Some(document) = documents.pop() {
                target
                    .insert_one(document)
                    .await
                    .map_err(|e| NexusError::Database(format!("Insert failed: {}", e)))?;
            }
            return Ok(1);
        }

        let result = target
            .insert_many(documents)
            .await
            .map_err(|e| NexusError::Database(format!("Insert failed: {}", e)))?;

        Ok(result.inserted_ids.len() as u64)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        scope: WriteScope,
    ) -> Result<UpdateCounts> {
        let target = self.collection(collection);
        let result = match scope {
            WriteScope::One => target.update_one(filter, update).await,
            WriteScope::Many => target.update_many(filter, update).await,
        }
        .map_err(|e| NexusError::Database(format!("Update failed: {}", e)))?;

        Ok(UpdateCounts {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete(&self, collection: &str, filter: Document, scope: WriteScope) -> Result<u64> {
        let target = self.collection(collection);
        let result = match scope {
            WriteScope::One => target.delete_one(filter).await,
            WriteScope::Many => target.delete_many(filter).await,
        }
        .map_err(|e| NexusError::Database(format!("Delete failed: {}", e)))?;

        Ok(result.deleted_count)
    }

    async fn left_join(
        &self,
        collection: &str,
        join: &LeftJoin,
        filter: Document,
        view: FindView,
    ) -> Result<Vec<Document>> {
        let pipeline = join.pipeline(filter, &view);
        debug!("Aggregating '{}' with {} stages", collection, pipeline.len());

        let cursor = self
            .collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(|e| NexusError::Database(format!("Aggregate failed: {}", e)))?;

        Ok(collect_cursor(cursor).await)
    }
}
