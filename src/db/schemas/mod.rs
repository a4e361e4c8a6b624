//! Database schemas for WCNexus
//!
//! Defines the documents stored in the `nexuses`, `photos` and `projects`
//! collections, the joined project view, and the input shapes accepted from
//! clients.

mod nexus;
mod photo;
mod project;

pub use nexus::{InputNexus, Nexus, NEXUS_COLLECTION};
pub use photo::{InputPhoto, Photo, PHOTO_COLLECTION, PHOTO_KEY_PREFIX};
pub use project::{
    InputProject, JointProject, ProjectRecord, PROJECT_COLLECTION, PROJECT_KEY_PREFIX,
    PROJECT_TYPE, TECHNOLOGY_TYPE,
};

use bson::{doc, Document};
use mongodb::options::IndexOptions;

/// Natural key field shared by every collection
pub const KEY_FIELD: &str = "dbname";

/// Unique index on the natural key
pub(crate) fn key_index() -> Vec<(Document, Option<IndexOptions>)> {
    vec![(
        doc! { KEY_FIELD: 1 },
        Some(
            IndexOptions::builder()
                .unique(true)
                .name("dbname_unique".to_string())
                .build(),
        ),
    )]
}

/// `"<prefix>-<uuid>"` when the caller left the key blank
pub(crate) fn key_or_generate(key: Option<&str>, prefix: &str) -> String {
    match key.map(str::trim) {
        Some(k) if !k.is_empty() => k.to_string(),
        _ => format!("{}-{}", prefix, uuid::Uuid::new_v4()),
    }
}
