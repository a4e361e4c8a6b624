//! In-memory document backend
//!
//! Keeps each collection as a vector of BSON documents in a `DashMap`.
//! Used when MongoDB is unavailable in dev mode and by the test suite.
//! Unique indexes are honoured so duplicate keys fail the same way they do
//! against a real server.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use dashmap::DashMap;
use mongodb::options::IndexOptions;
use tracing::{debug, warn};

use crate::db::backend::{DocumentBackend, UpdateCounts, WriteScope};
use crate::db::join::{merge_under, LeftJoin};
use crate::db::query;
use crate::db::view::FindView;
use crate::types::{NexusError, Result};

#[derive(Default)]
pub struct MemoryBackend {
    collections: DashMap<String, Vec<Document>>,
    /// Unique single-field indexes per collection
    unique_fields: DashMap<String, Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        warn!("Using in-memory document backend (data is not persisted)");
        Self::default()
    }

    /// Number of documents currently stored in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    fn unique_fields(&self, collection: &str) -> Vec<String> {
        self.unique_fields
            .get(collection)
            .map(|fields| fields.clone())
            .unwrap_or_default()
    }

    /// Find a document in `existing` that collides with `candidate` on a unique field
    fn duplicate_of(
        existing: &[Document],
        candidate: &Document,
        unique: &[String],
        skip_index: Option<usize>,
    ) -> Option<(String, Bson)> {
        for field in unique {
            let Some(value) = query::lookup(candidate, field) else {
                continue;
            };
            let clash = existing.iter().enumerate().any(|(i, doc)| {
                Some(i) != skip_index
                    && query::lookup(doc, field).is_some_and(|v| query::values_equal(v, value))
            });
            if clash {
                return Some((field.clone(), value.clone()));
            }
        }
        None
    }
}

fn apply_view(mut docs: Vec<Document>, view: &FindView) -> Result<Vec<Document>> {
    if let Some(ref sort) = view.sort {
        query::sort_documents(&mut docs, sort);
    }

    let skip = usize::try_from(view.skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let mut docs: Vec<Document> = docs.into_iter().skip(skip).collect();

    // MongoDB treats a limit of 0 as "no limit" and a negative one as its magnitude
    if let Some(limit) = view.limit {
        if limit != 0 {
            docs.truncate(limit.unsigned_abs() as usize);
        }
    }

    match view.projection {
        Some(ref projection) => docs
            .iter()
            .map(|doc| query::project(doc, projection))
            .collect(),
        None => Ok(docs),
    }
}

fn filter_documents(docs: Vec<Document>, filter: &Document) -> Result<Vec<Document>> {
    let mut matched = Vec::new();
    for doc in docs {
        if query::matches(&doc, filter)? {
            matched.push(doc);
        }
    }
    Ok(matched)
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ensure_indexes(
        &self,
        collection: &str,
        indexes: Vec<(Document, Option<IndexOptions>)>,
    ) -> Result<()> {
        let mut unique = self.unique_fields.entry(collection.to_string()).or_default();
        for (keys, options) in indexes {
            let is_unique = options.and_then(|o| o.unique).unwrap_or(false);
            if is_unique && keys.len() == 1 {
                if let Some(field) = keys.keys().next() {
                    if !unique.contains(field) {
                        unique.push(field.clone());
                    }
                }
            }
        }
        debug!("Memory indexes for '{}': unique {:?}", collection, *unique);
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        view: FindView,
    ) -> Result<Vec<Document>> {
        let matched = filter_documents(self.snapshot(collection), &filter)?;
        apply_view(matched, &view)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> Result<u64> {
        let unique = self.unique_fields(collection);
        let mut stored = self.collections.entry(collection.to_string()).or_default();

        // Validate the whole batch before writing so a duplicate leaves nothing behind
        let mut staged: Vec<Document> = Vec::with_capacity(documents.len());
        for mut doc in documents {
            if !doc.contains_key("_id") {
                doc.insert("_id", ObjectId::new());
            }
            let mut unique_with_id = unique.clone();
            unique_with_id.push("_id".to_string());

            let collision = Self::duplicate_of(&stored, &doc, &unique_with_id, None)
                .or_else(|| Self::duplicate_of(&staged, &doc, &unique_with_id, None));
            if let Some((field, value)) = collision {
                return Err(NexusError::Database(format!(
                    "E11000 duplicate key error collection: {} index: {} dup key: {{ {}: {} }}",
                    collection, field, field, value
                )));
            }
            staged.push(doc);
        }

        let count = staged.len() as u64;
        stored.extend(staged);
        Ok(count)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        scope: WriteScope,
    ) -> Result<UpdateCounts> {
        let unique = self.unique_fields(collection);
        let mut stored = self.collections.entry(collection.to_string()).or_default();
        let mut counts = UpdateCounts::default();

        // Work on a copy and commit only if every targeted document updates cleanly
        let mut working = stored.clone();
        for index in 0..working.len() {
            if !query::matches(&working[index], &filter)? {
                continue;
            }
            counts.matched += 1;

            let mut candidate = working[index].clone();
            if query::apply_update(&mut candidate, &update)? {
                if let Some((field, value)) =
                    Self::duplicate_of(&working, &candidate, &unique, Some(index))
                {
                    return Err(NexusError::Database(format!(
                        "E11000 duplicate key error collection: {} index: {} dup key: {{ {}: {} }}",
                        collection, field, field, value
                    )));
                }
                working[index] = candidate;
                counts.modified += 1;
            }

            if scope == WriteScope::One {
                break;
            }
        }

        *stored = working;
        Ok(counts)
    }

    async fn delete(&self, collection: &str, filter: Document, scope: WriteScope) -> Result<u64> {
        let mut stored = self.collections.entry(collection.to_string()).or_default();

        let mut doomed = Vec::new();
        for (index, doc) in stored.iter().enumerate() {
            if query::matches(doc, &filter)? {
                doomed.push(index);
                if scope == WriteScope::One {
                    break;
                }
            }
        }

        for index in doomed.iter().rev() {
            stored.remove(*index);
        }
        Ok(doomed.len() as u64)
    }

    async fn left_join(
        &self,
        collection: &str,
        join: &LeftJoin,
        filter: Document,
        view: FindView,
    ) -> Result<Vec<Document>> {
        let locals = self.snapshot(collection);
        let foreigns = self.snapshot(&join.from);

        let foreigns = match join.foreign_match {
            Some(ref filter) => filter_documents(foreigns, filter)?,
            None => foreigns,
        };

        let joined: Vec<Document> = locals
            .iter()
            .filter_map(|local| {
                let key = query::lookup(local, &join.local_field).unwrap_or(&Bson::Null);
                let foreign = foreigns.iter().find(|candidate| {
                    let other = query::lookup(candidate, &join.foreign_field).unwrap_or(&Bson::Null);
                    query::values_equal(key, other)
                })?;
                Some(merge_under(foreign, local))
            })
            .collect();

        let matched = filter_documents(joined, &filter)?;
        apply_view(matched, &view)
    }
}
