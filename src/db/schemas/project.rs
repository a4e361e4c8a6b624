//! Project schemas
//!
//! A project is stored in two places: its base fields as a `Nexus` in
//! `nexuses`, and its technology/image references as a `ProjectRecord` in
//! `projects`. `JointProject` is the joined read model.

use bson::{oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::backend::IntoIndexes;
use crate::db::schemas::{key_index, key_or_generate, Nexus};

/// Collection name for the project side table
pub const PROJECT_COLLECTION: &str = "projects";

/// Key prefix for projects added without a key
pub const PROJECT_KEY_PREFIX: &str = "project";

/// Nexus type of the base half of a project
pub const PROJECT_TYPE: &str = "type-project";

/// Nexus type of technologies referenced from `techs`
pub const TECHNOLOGY_TYPE: &str = "type-technology";

/// Side-table row: the project's references to other records
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProjectRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub dbname: String,

    /// Keys of technology nexuses
    #[serde(default)]
    pub techs: Vec<String>,

    /// Keys of photos
    #[serde(default)]
    pub images: Vec<String>,
}

/// Project side-table row joined with its base nexus
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct JointProject {
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

    #[serde(default)]
    pub logo: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub techs: Vec<String>,

    #[serde(default)]
    pub images: Vec<String>,
}

/// Project as submitted by clients; a submitted `type` is ignored
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputProject {
    #[serde(default, alias = "DBName", alias = "dbName")]
    pub dbname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "URL")]
    pub url: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub techs: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl InputProject {
    /// Split into the base nexus and the side-table row, sharing one key
    pub fn split(self) -> (Nexus, ProjectRecord) {
        let dbname = key_or_generate(self.dbname.as_deref(), PROJECT_KEY_PREFIX);

        let nexus = Nexus {
            id: None,
            dbname: dbname.clone(),
            name: self.name,
            description: self.description,
            url: self.url,
            logo: self.logo,
            kind: Some(PROJECT_TYPE.to_string()),
        };

        let record = ProjectRecord {
            id: None,
            dbname,
            techs: self.techs,
            images: self.images,
        };

        (nexus, record)
    }
}

impl IntoIndexes for ProjectRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        key_index()
    }
}
