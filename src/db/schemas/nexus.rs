//! Nexus document schema
//!
//! The base entity: anything with a name, a link and a logo. Technologies
//! and the base half of every project live here.

use bson::{oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::backend::IntoIndexes;
use crate::db::schemas::{key_index, key_or_generate};

/// Collection name for nexus items
pub const NEXUS_COLLECTION: &str = "nexuses";

/// Key prefix for nexus items added without a key
const NEXUS_KEY_PREFIX: &str = "nexus";

/// Nexus document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Nexus {
    /// MongoDB document ID
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Natural key, unique within the collection
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

    /// Category such as `type-technology` or `type-project`; fixed at creation
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Nexus as submitted by clients
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputNexus {
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
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl From<InputNexus> for Nexus {
    fn from(input: InputNexus) -> Self {
        Self {
            id: None,
            dbname: key_or_generate(input.dbname.as_deref(), NEXUS_KEY_PREFIX),
            name: input.name,
            description: input.description,
            url: input.url,
            logo: input.logo,
            kind: input.kind,
        }
    }
}

impl IntoIndexes for Nexus {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        let mut indices = key_index();
        // Technology expansion filters on type
        indices.push((
            bson::doc! { "type": 1 },
            Some(
                IndexOptions::builder()
                    .name("type_index".to_string())
                    .build(),
            ),
        ));
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bson_field_names() {
        let nexus = Nexus {
            dbname: "tech-rust".into(),
            name: Some("Rust".into()),
            kind: Some("type-technology".into()),
            ..Default::default()
        };
        let doc = bson::to_document(&nexus).unwrap();
        assert!(!doc.contains_key("_id"));
        assert_eq!(doc.get_str("type").unwrap(), "type-technology");
        assert_eq!(doc.get_str("dbname").unwrap(), "tech-rust");
    }

    #[test]
    fn test_input_accepts_legacy_names() {
        let input: InputNexus = serde_json::from_str(
            r#"{"DBName":"tech-angular","name":"Angular","URL":"https://angular.io","type":"type-technology"}"#,
        )
        .unwrap();
        let nexus = Nexus::from(input);
        assert_eq!(nexus.dbname, "tech-angular");
        assert_eq!(nexus.url.as_deref(), Some("https://angular.io"));
    }

    #[test]
    fn test_partial_document_deserializes() {
        let nexus: Nexus = bson::from_document(bson::doc! { "dbname": "x" }).unwrap();
        assert_eq!(nexus.dbname, "x");
        assert!(nexus.name.is_none());
    }
}
