//! Photo document schema

use bson::{oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::backend::IntoIndexes;
use crate::db::schemas::{key_index, key_or_generate};

/// Collection name for photos
pub const PHOTO_COLLECTION: &str = "photos";

/// Key prefix for photos added without a key
pub const PHOTO_KEY_PREFIX: &str = "photo";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Photo {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub dbname: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputPhoto {
    #[serde(default, alias = "DBName", alias = "dbName")]
    pub dbname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "URL")]
    pub url: Option<String>,
}

impl From<InputPhoto> for Photo {
    fn from(input: InputPhoto) -> Self {
        Self {
            id: None,
            dbname: key_or_generate(input.dbname.as_deref(), PHOTO_KEY_PREFIX),
            name: input.name,
            description: input.description,
            url: input.url,
        }
    }
}

impl IntoIndexes for Photo {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        key_index()
    }
}
