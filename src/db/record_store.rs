//! Generic record store
//!
//! One `RecordStore<T>` per collection. Reads return typed records, writes
//! return an `Outcome`. Backend failures are logged and folded into the
//! result; callers only ever inspect `Outcome::ok`.

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::db::backend::{DocumentBackend, IntoIndexes, WriteScope};
use crate::db::join::LeftJoin;
use crate::db::outcome::Outcome;
use crate::db::token::UpdateToken;
use crate::db::view::{FindView, ViewOption};
use crate::types::{NexusError, Result};

/// How a record is addressed by key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// A unique string field such as `dbname`
    Natural(&'static str),
    /// The store-assigned `_id`, given as a hex ObjectId
    Identity,
}

impl KeyKind {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Natural(field) => field,
            Self::Identity => "_id",
        }
    }

    fn value(&self, key: &str) -> Result<Bson> {
        match self {
            Self::Natural(_) => Ok(Bson::String(key.to_string())),
            Self::Identity => ObjectId::parse_str(key)
                .map(Bson::ObjectId)
                .map_err(|e| NexusError::BadRequest(format!("invalid object id '{}': {}", key, e))),
        }
    }
}

pub struct RecordStore<T> {
    backend: Arc<dyn DocumentBackend>,
    collection: String,
    key: KeyKind,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            collection: self.collection.clone(),
            key: self.key,
            _record: PhantomData,
        }
    }
}

impl<T> RecordStore<T>
where
    T: Serialize + DeserializeOwned + IntoIndexes + Send + Sync,
{
    /// Bind a store to a collection and create the record type's indexes
    pub async fn new(
        backend: Arc<dyn DocumentBackend>,
        collection: impl Into<String>,
        key: KeyKind,
    ) -> Result<Self> {
        let collection = collection.into();
        backend
            .ensure_indexes(&collection, T::into_indices())
            .await?;

        Ok(Self {
            backend,
            collection,
            key,
            _record: PhantomData,
        })
    }

    /// Equality filter on the key field
    pub fn key_filter(&self, key: &str) -> Result<Document> {
        Ok(doc! { self.key.field(): self.key.value(key)? })
    }

    /// `{key: {$in: keys}}`
    pub fn keys_filter(&self, keys: &[Bson]) -> Document {
        doc! { self.key.field(): { "$in": keys.to_vec() } }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_one(&self, key: &str, view: Option<&ViewOption>) -> Option<T> {
        let filter = match self.key_filter(key) {
            Ok(filter) => filter,
            Err(e) => {
                debug!("get_one on '{}' with unusable key: {}", self.collection, e);
                return None;
            }
        };

        let mut find_view = FindView::from_option(view);
        find_view.limit = Some(1);

        self.find_typed::<T>(filter, find_view).await.into_iter().next()
    }

    pub async fn get_many(&self, filter: Document, view: Option<&ViewOption>) -> Vec<T> {
        self.find_typed::<T>(filter, FindView::from_option(view))
            .await
    }

    async fn find_typed<R: DeserializeOwned>(&self, filter: Document, view: FindView) -> Vec<R> {
        match self.backend.find(&self.collection, filter, view).await {
            Ok(docs) => decode_all(&self.collection, docs),
            Err(e) => {
                error!("Find on '{}' failed: {}", self.collection, e);
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn add(&self, item: &T) -> Outcome {
        self.add_many(std::slice::from_ref(item)).await
    }

    pub async fn add_many(&self, items: &[T]) -> Outcome {
        if items.is_empty() {
            return Outcome::untouched();
        }

        let documents = match items
            .iter()
            .map(bson::to_document)
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(documents) => documents,
            Err(e) => return self.failed("Insert", e.into()),
        };

        match self.backend.insert(&self.collection, documents).await {
            Ok(count) => {
                debug!("Inserted {} into '{}'", count, self.collection);
                Outcome::success(count)
            }
            Err(e) => self.failed("Insert", e),
        }
    }

    pub async fn update(&self, key: &str, token: UpdateToken) -> Outcome {
        match self.key_filter(key) {
            Ok(filter) => self.write_update(filter, token, WriteScope::One).await,
            Err(e) => self.failed("Update", e),
        }
    }

    pub async fn update_many(&self, filter: Document, token: UpdateToken) -> Outcome {
        self.write_update(filter, token, WriteScope::Many).await
    }

    async fn write_update(&self, filter: Document, token: UpdateToken, scope: WriteScope) -> Outcome {
        match self
            .backend
            .update(&self.collection, filter, token.into_document(), scope)
            .await
        {
            Ok(counts) => {
                debug!(
                    "Updated '{}': matched {}, modified {}",
                    self.collection, counts.matched, counts.modified
                );
                Outcome::success(counts.modified)
            }
            Err(e) => self.failed("Update", e),
        }
    }

    pub async fn delete(&self, key: &str) -> Outcome {
        match self.key_filter(key) {
            Ok(filter) => self.write_delete(filter, WriteScope::One).await,
            Err(e) => self.failed("Delete", e),
        }
    }

    pub async fn delete_many(&self, filter: Document) -> Outcome {
        self.write_delete(filter, WriteScope::Many).await
    }

    async fn write_delete(&self, filter: Document, scope: WriteScope) -> Outcome {
        match self.backend.delete(&self.collection, filter, scope).await {
            Ok(count) => {
                debug!("Deleted {} from '{}'", count, self.collection);
                Outcome::success(count)
            }
            Err(e) => self.failed("Delete", e),
        }
    }

    fn failed(&self, action: &str, e: NexusError) -> Outcome {
        error!("{} on '{}' failed: {}", action, self.collection, e);
        Outcome::failure(e.to_string())
    }

    // =========================================================================
    // Joins
    // =========================================================================

    /// Joined record for one key; foreign fields fill in under local ones
    pub async fn left_join_one<J: DeserializeOwned>(
        &self,
        key: &str,
        join: &LeftJoin,
        view: Option<&ViewOption>,
    ) -> Option<J> {
        let filter = match self.key_filter(key) {
            Ok(filter) => filter,
            Err(e) => {
                debug!("left_join_one on '{}' with unusable key: {}", self.collection, e);
                return None;
            }
        };

        let mut find_view = FindView::from_option(view);
        find_view.limit = Some(1);

        self.join_typed::<J>(join, filter, find_view)
            .await
            .into_iter()
            .next()
    }

    /// Joined records matching `filter`; without a view only the first page comes back
    pub async fn left_join_many<J: DeserializeOwned>(
        &self,
        filter: Document,
        join: &LeftJoin,
        view: Option<&ViewOption>,
    ) -> Vec<J> {
        self.join_typed::<J>(join, filter, FindView::paged_or_default(view))
            .await
    }

    /// Keys of every joined record matching `filter`, unpaged
    pub async fn resolve_joined_keys(&self, filter: Document, join: &LeftJoin) -> Result<Vec<Bson>> {
        let field = self.key.field();
        let view = FindView {
            projection: Some(doc! { field: 1 }),
            ..Default::default()
        };

        let docs = self
            .backend
            .left_join(&self.collection, join, filter, view)
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|mut doc| doc.remove(field))
            .collect())
    }

    async fn join_typed<J: DeserializeOwned>(
        &self,
        join: &LeftJoin,
        filter: Document,
        view: FindView,
    ) -> Vec<J> {
        match self
            .backend
            .left_join(&self.collection, join, filter, view)
            .await
        {
            Ok(docs) => decode_all(&self.collection, docs),
            Err(e) => {
                error!(
                    "Join of '{}' with '{}' failed: {}",
                    self.collection, join.from, e
                );
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Array fields
    // =========================================================================

    /// Append values to an array field; duplicates are kept
    pub async fn add_to_list(&self, field: &str, values: Vec<Bson>, key: &str) -> Outcome {
        let update = match values.len() {
            0 => return Outcome::untouched(),
            1 => doc! { "$push": { field: values[0].clone() } },
            _ => doc! { "$push": { field: { "$each": values } } },
        };
        self.update_raw(key, update).await
    }

    /// Remove every occurrence of the given values from an array field
    pub async fn remove_from_list(&self, field: &str, values: Vec<Bson>, key: &str) -> Outcome {
        let update = match values.len() {
            0 => return Outcome::untouched(),
            1 => doc! { "$pull": { field: values[0].clone() } },
            _ => doc! { "$pull": { field: { "$in": values } } },
        };
        self.update_raw(key, update).await
    }

    async fn update_raw(&self, key: &str, update: Document) -> Outcome {
        match UpdateToken::parse(update) {
            Ok(token) => self.update(key, token).await,
            Err(e) => self.failed("Update", e),
        }
    }
}

/// Decode documents into records, logging and skipping the ones that don't fit
fn decode_all<R: DeserializeOwned>(collection: &str, docs: Vec<Document>) -> Vec<R> {
    docs.into_iter()
        .filter_map(|doc| match bson::from_document(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                error!("Skipping undecodable document in '{}': {}", collection, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;
    use crate::db::schemas::{Nexus, Photo, ProjectRecord, NEXUS_COLLECTION, PHOTO_COLLECTION};
    use crate::db::schemas::JointProject;

    async fn photo_store() -> RecordStore<Photo> {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::new());
        RecordStore::new(backend, PHOTO_COLLECTION, KeyKind::Natural("dbname"))
            .await
            .unwrap()
    }

    fn photo(key: &str, name: &str) -> Photo {
        Photo {
            dbname: key.to_string(),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn token(update: Document) -> UpdateToken {
        UpdateToken::parse(update).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_get_one() {
        let store = photo_store().await;
        let outcome = store.add(&photo("photo-cat", "Cat")).await;
        assert_eq!(outcome, Outcome::success(1));

        let found = store.get_one("photo-cat", None).await.unwrap();
        assert_eq!(found.dbname, "photo-cat");
        assert!(found.id.is_some());
        assert!(store.get_one("photo-dog", None).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_a_failed_outcome() {
        let store = photo_store().await;
        assert!(store.add(&photo("photo-cat", "Cat")).await.ok);

        let outcome = store.add(&photo("photo-cat", "Other cat")).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.num_affected, 0);
        assert!(outcome.message.contains("duplicate key"));
    }

    #[tokio::test]
    async fn test_add_many_counts_batch() {
        let store = photo_store().await;
        let outcome = store
            .add_many(&[photo("photo-a", "A"), photo("photo-b", "B"), photo("photo-c", "C")])
            .await;
        assert_eq!(outcome.num_affected, 3);
        assert_eq!(store.get_many(doc! {}, None).await.len(), 3);
        assert_eq!(store.add_many(&[]).await, Outcome::untouched());
    }

    #[tokio::test]
    async fn test_update_leaves_omitted_fields() {
        let store = photo_store().await;
        let mut cat = photo("photo-cat", "Cat");
        cat.url = Some("https://img/cat.png".into());
        store.add(&cat).await;

        let outcome = store
            .update("photo-cat", token(doc! { "$set": { "name": "Kitten" } }))
            .await;
        assert_eq!(outcome, Outcome::success(1));

        let found = store.get_one("photo-cat", None).await.unwrap();
        assert_eq!(found.name.as_deref(), Some("Kitten"));
        assert_eq!(found.url.as_deref(), Some("https://img/cat.png"));
    }

    #[tokio::test]
    async fn test_update_counts_modified_not_matched() {
        let store = photo_store().await;
        store.add(&photo("photo-cat", "Cat")).await;

        let outcome = store
            .update("photo-cat", token(doc! { "$set": { "name": "Cat" } }))
            .await;
        assert_eq!(outcome, Outcome::success(0));
    }

    #[tokio::test]
    async fn test_update_many_by_filter() {
        let store = photo_store().await;
        store
            .add_many(&[photo("photo-a", "A"), photo("photo-b", "B"), photo("photo-c", "C")])
            .await;

        let outcome = store
            .update_many(
                doc! { "dbname": { "$in": ["photo-a", "photo-b"] } },
                token(doc! { "$set": { "description": "batch" } }),
            )
            .await;
        assert_eq!(outcome.num_affected, 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_at_count_level() {
        let store = photo_store().await;
        store.add(&photo("photo-cat", "Cat")).await;

        assert_eq!(store.delete("photo-cat").await, Outcome::success(1));
        assert!(store.get_one("photo-cat", None).await.is_none());
        assert_eq!(store.delete("photo-cat").await, Outcome::success(0));
    }

    #[tokio::test]
    async fn test_view_applies_to_reads() {
        let store = photo_store().await;
        let photos: Vec<Photo> = (0..25)
            .map(|i| photo(&format!("photo-{:02}", i), &format!("P{:02}", i)))
            .collect();
        store.add_many(&photos).await;

        let view = ViewOption {
            page: 2,
            per_page: 10,
            order_by: Some("dbname".into()),
            order: Some("desc".into()),
            ..Default::default()
        };
        let page = store.get_many(doc! {}, Some(&view)).await;
        assert_eq!(page.len(), 10);
        assert_eq!(page[0].dbname, "photo-14");

        // No view on a plain read means no paging
        assert_eq!(store.get_many(doc! {}, None).await.len(), 25);

        let trimmed = store
            .get_one("photo-03", Some(&ViewOption::including(["dbname"])))
            .await
            .unwrap();
        assert!(trimmed.name.is_none());
    }

    #[tokio::test]
    async fn test_identity_key_kind() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::new());
        let store: RecordStore<Photo> = RecordStore::new(backend, PHOTO_COLLECTION, KeyKind::Identity)
            .await
            .unwrap();
        store.add(&photo("photo-cat", "Cat")).await;

        let stored = store.get_many(doc! {}, None).await.remove(0);
        let id = stored.id.unwrap().to_hex();
        assert_eq!(store.get_one(&id, None).await.unwrap().dbname, "photo-cat");

        assert!(store.get_one("not-an-object-id", None).await.is_none());
        assert!(!store.delete("not-an-object-id").await.ok);
    }

    #[tokio::test]
    async fn test_list_operations_push_and_pull() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::new());
        let store: RecordStore<ProjectRecord> =
            RecordStore::new(backend, "projects", KeyKind::Natural("dbname"))
                .await
                .unwrap();
        store
            .add(&ProjectRecord {
                dbname: "project-x".into(),
                ..Default::default()
            })
            .await;

        let one = vec![Bson::from("photo-a")];
        assert_eq!(store.add_to_list("images", one.clone(), "project-x").await.num_affected, 1);
        assert_eq!(store.add_to_list("images", one.clone(), "project-x").await.num_affected, 1);
        store
            .add_to_list("images", vec![Bson::from("photo-b"), Bson::from("photo-c")], "project-x")
            .await;

        let record = store.get_one("project-x", None).await.unwrap();
        assert_eq!(record.images, vec!["photo-a", "photo-a", "photo-b", "photo-c"]);

        store.remove_from_list("images", one, "project-x").await;
        store
            .remove_from_list("images", vec![Bson::from("photo-b"), Bson::from("photo-z")], "project-x")
            .await;
        let record = store.get_one("project-x", None).await.unwrap();
        assert_eq!(record.images, vec!["photo-c"]);
    }

    #[tokio::test]
    async fn test_left_join_merges_and_resolves_keys() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::new());
        let nexuses: RecordStore<Nexus> =
            RecordStore::new(Arc::clone(&backend), NEXUS_COLLECTION, KeyKind::Natural("dbname"))
                .await
                .unwrap();
        let projects: RecordStore<ProjectRecord> =
            RecordStore::new(backend, "projects", KeyKind::Natural("dbname"))
                .await
                .unwrap();

        nexuses
            .add(&Nexus {
                dbname: "project-x".into(),
                name: Some("X".into()),
                kind: Some("type-project".into()),
                ..Default::default()
            })
            .await;
        projects
            .add(&ProjectRecord {
                dbname: "project-x".into(),
                techs: vec!["tech-a".into()],
                ..Default::default()
            })
            .await;
        projects
            .add(&ProjectRecord {
                dbname: "project-orphan".into(),
                ..Default::default()
            })
            .await;

        let join = LeftJoin::new(NEXUS_COLLECTION, "dbname", "dbname");
        let joint: JointProject = projects
            .left_join_one("project-x", &join, None)
            .await
            .unwrap();
        assert_eq!(joint.name.as_deref(), Some("X"));
        assert_eq!(joint.techs, vec!["tech-a"]);

        let keys = projects
            .resolve_joined_keys(doc! { "name": "X" }, &join)
            .await
            .unwrap();
        assert_eq!(keys, vec![Bson::from("project-x")]);

        let all: Vec<JointProject> = projects.left_join_many(doc! {}, &join, None).await;
        assert_eq!(all.len(), 1);
        assert!(projects
            .left_join_one::<JointProject>("project-orphan", &join, None)
            .await
            .is_none());
    }
}
