//! Single-collection services for Nexus and Photo
//!
//! Both are plain record stores with a fixed set of updatable fields; the
//! key and `type` never change after creation.

use std::sync::Arc;

use bson::Document;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::db::backend::{DocumentBackend, IntoIndexes};
use crate::db::schemas::{
    InputNexus, InputPhoto, Nexus, Photo, KEY_FIELD, NEXUS_COLLECTION, PHOTO_COLLECTION,
};
use crate::db::{FieldShape, KeyKind, Outcome, RecordStore, UpdateToken, ViewOption};
use crate::types::Result;

/// A record type served from one collection
pub trait CatalogRecord:
    Serialize + DeserializeOwned + IntoIndexes + Send + Sync + 'static
{
    /// Route segment and log name
    const ENTITY: &'static str;
    const COLLECTION: &'static str;
    /// Fields an update token may touch; all are optional strings
    const UPDATABLE: &'static [&'static str];

    type Input: DeserializeOwned + Send + Into<Self>;

    fn key(&self) -> &str;
}

impl CatalogRecord for Nexus {
    const ENTITY: &'static str = "nexus";
    const COLLECTION: &'static str = NEXUS_COLLECTION;
    const UPDATABLE: &'static [&'static str] = &["name", "description", "url", "logo"];
    type Input = InputNexus;

    fn key(&self) -> &str {
        &self.dbname
    }
}

impl CatalogRecord for Photo {
    const ENTITY: &'static str = "photo";
    const COLLECTION: &'static str = PHOTO_COLLECTION;
    const UPDATABLE: &'static [&'static str] = &["name", "description", "url"];
    type Input = InputPhoto;

    fn key(&self) -> &str {
        &self.dbname
    }
}

pub type NexusService = CatalogService<Nexus>;
pub type PhotoService = CatalogService<Photo>;

pub struct CatalogService<T> {
    store: RecordStore<T>,
}

impl<T> Clone for CatalogService<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T: CatalogRecord> CatalogService<T> {
    pub async fn new(backend: Arc<dyn DocumentBackend>) -> Result<Self> {
        let store = RecordStore::new(backend, T::COLLECTION, KeyKind::Natural(KEY_FIELD)).await?;
        Ok(Self { store })
    }

    pub async fn get(&self, key: &str, view: Option<&ViewOption>) -> Option<T> {
        self.store.get_one(key, view).await
    }

    pub async fn get_many(&self, filter: Document, view: Option<&ViewOption>) -> Vec<T> {
        self.store.get_many(filter, view).await
    }

    /// Insert one record; convert inputs with `Into` first so blank keys get generated
    pub async fn add(&self, record: &T) -> Outcome {
        self.store.add(record).await
    }

    pub async fn add_many(&self, records: &[T]) -> Outcome {
        self.store.add_many(records).await
    }

    /// Reject a token that would store a non-string in an updatable field
    pub fn check_token(&self, token: &UpdateToken) -> Result<()> {
        let shapes: Vec<(&str, FieldShape)> = T::UPDATABLE
            .iter()
            .map(|field| (*field, FieldShape::Text))
            .collect();
        token.check_fields(&shapes)
    }

    pub async fn update(&self, key: &str, token: UpdateToken) -> Outcome {
        if let Err(e) = self.check_token(&token) {
            return Outcome::failure(e.to_string());
        }
        match self.restrict(&token) {
            Some(token) => self.store.update(key, token).await,
            None => Outcome::untouched(),
        }
    }

    pub async fn update_many(&self, filter: Document, token: UpdateToken) -> Outcome {
        if let Err(e) = self.check_token(&token) {
            return Outcome::failure(e.to_string());
        }
        match self.restrict(&token) {
            Some(token) => self.store.update_many(filter, token).await,
            None => Outcome::untouched(),
        }
    }

    pub async fn delete(&self, key: &str) -> Outcome {
        self.store.delete(key).await
    }

    pub async fn delete_many(&self, filter: Document) -> Outcome {
        self.store.delete_many(filter).await
    }

    fn restrict(&self, token: &UpdateToken) -> Option<UpdateToken> {
        let dropped = token.unknown_fields(&[T::UPDATABLE]);
        if !dropped.is_empty() {
            debug!("Dropping non-updatable {} fields: {:?}", T::ENTITY, dropped);
        }
        token.partition(T::UPDATABLE)
    }
}
