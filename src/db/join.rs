//! Left join across two collections
//!
//! The local document is laid over the first matching foreign document, so
//! local fields win on conflict and foreign fields act as defaults. Locals
//! without a foreign match are dropped, as are foreign documents that fail
//! the optional `foreign_match` filter.

use bson::{doc, Bson, Document};

use crate::db::view::FindView;

/// Temporary field holding the `$lookup` result
pub const JOIN_FIELD: &str = "__joint";

#[derive(Debug, Clone, PartialEq)]
pub struct LeftJoin {
    /// Foreign collection name
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    /// Filter a foreign document must also satisfy to count as a match
    pub foreign_match: Option<Document>,
}

impl LeftJoin {
    pub fn new(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            foreign_match: None,
        }
    }

    pub fn with_foreign_match(mut self, filter: Document) -> Self {
        self.foreign_match = Some(filter);
        self
    }

    fn require_match(&self) -> Document {
        match self.foreign_match {
            Some(ref filter) => doc! { "$match": { JOIN_FIELD: { "$elemMatch": filter.clone() } } },
            None => doc! { "$match": { JOIN_FIELD: { "$ne": [] } } },
        }
    }

    /// Aggregation pipeline for this join
    ///
    /// Stage order: lookup, require a match, merge, drop artifact, match,
    /// sort, skip, limit, project.
    pub fn pipeline(&self, filter: Document, view: &FindView) -> Vec<Document> {
        let mut pipeline = vec![
            doc! {
                "$lookup": {
                    "from": &self.from,
                    "localField": &self.local_field,
                    "foreignField": &self.foreign_field,
                    "as": JOIN_FIELD,
                }
            },
            self.require_match(),
            doc! {
                "$replaceRoot": {
                    "newRoot": {
                        "$mergeObjects": [
                            { "$arrayElemAt": [format!("${}", JOIN_FIELD), 0] },
                            "$$ROOT",
                        ]
                    }
                }
            },
            doc! { "$project": { JOIN_FIELD: 0 } },
            doc! { "$match": filter },
        ];

        if let Some(ref sort) = view.sort {
            pipeline.push(doc! { "$sort": sort.clone() });
        }
        if let Some(skip) = view.skip {
            pipeline.push(doc! { "$skip": Bson::Int64(i64::try_from(skip).unwrap_or(i64::MAX)) });
        }
        if let Some(limit) = view.limit {
            pipeline.push(doc! { "$limit": limit });
        }
        if let Some(ref projection) = view.projection {
            pipeline.push(doc! { "$project": projection.clone() });
        }

        pipeline
    }
}

/// Merge a foreign document under a local one
pub fn merge_under(foreign: &Document, local: &Document) -> Document {
    let mut merged = foreign.clone();
    for (key, value) in local {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
