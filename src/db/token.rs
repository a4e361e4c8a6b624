//! Update tokens
//!
//! An update token maps an operator (`$set`, `$push`, ...) to a document of
//! field/value pairs. Composite entities split one token into per-collection
//! sub-tokens with `partition`. `check_fields` keeps a token from writing a
//! value the record types cannot read back.

use bson::{Bson, Document};

use crate::types::NexusError;

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateToken(Document);

/// Stored shape of an updatable field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Optional string
    Text,
    /// Array of strings
    TextList,
}

impl UpdateToken {
    /// Validate the operator/field shape of a raw update document
    pub fn parse(token: Document) -> Result<Self, NexusError> {
        if token.is_empty() {
            return Err(NexusError::BadRequest("update token is empty".to_string()));
        }
        for (operator, fields) in &token {
            if !operator.starts_with('$') {
                return Err(NexusError::BadRequest(format!(
                    "update token key '{}' is not an operator",
                    operator
                )));
            }
            if !matches!(fields, Bson::Document(_)) {
                return Err(NexusError::BadRequest(format!(
                    "operator '{}' must map to a document of fields",
                    operator
                )));
            }
        }
        Ok(Self(token))
    }

    /// Keep only the fields whose top-level name is in `allowlist`
    ///
    /// Returns `None` when nothing survives. Dotted paths (`techs.0`) are
    /// matched on their first segment.
    pub fn partition(&self, allowlist: &[&str]) -> Option<UpdateToken> {
        let mut partitioned = Document::new();

        for (operator, fields) in &self.0 {
            let Bson::Document(fields) = fields else {
                continue;
            };
            let kept: Document = fields
                .iter()
                .filter(|(field, _)| allowlist.contains(&top_level(field)))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();
            if !kept.is_empty() {
                partitioned.insert(operator.clone(), kept);
            }
        }

        if partitioned.is_empty() {
            None
        } else {
            Some(Self(partitioned))
        }
    }

    /// Field names that fall in none of the given allowlists
    pub fn unknown_fields(&self, allowlists: &[&[&str]]) -> Vec<String> {
        self.0
            .values()
            .filter_map(Bson::as_document)
            .flat_map(|fields| fields.keys())
            .filter(|field| {
                !allowlists
                    .iter()
                    .any(|list| list.contains(&top_level(field)))
            })
            .cloned()
            .collect()
    }

    /// Reject writes that would leave a listed field in a shape other than its own
    ///
    /// Only whole-field paths are accepted for listed fields; positional
    /// paths (`techs.3`) and operators that do not fit the shape are a
    /// `BadRequest`. Unlisted fields are not inspected.
    pub fn check_fields(&self, fields: &[(&str, FieldShape)]) -> Result<(), NexusError> {
        for (operator, values) in &self.0 {
            let Bson::Document(values) = values else {
                continue;
            };
            for (path, value) in values {
                let Some((name, shape)) = fields
                    .iter()
                    .find(|(name, _)| *name == top_level(path))
                else {
                    continue;
                };
                if path.as_str() != *name {
                    return Err(NexusError::BadRequest(format!(
                        "'{}' must be updated as a whole, not through '{}'",
                        name, path
                    )));
                }
                if !fits(operator, *shape, value) {
                    return Err(NexusError::BadRequest(format!(
                        "'{}' cannot be applied to '{}' with that value",
                        operator, name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

fn fits(operator: &str, shape: FieldShape, value: &Bson) -> bool {
    match (shape, operator) {
        (_, "$unset") => true,
        (FieldShape::Text, "$set") => matches!(value, Bson::String(_) | Bson::Null),
        (FieldShape::TextList, "$set" | "$pullAll") => is_text_list(value),
        (FieldShape::TextList, "$push" | "$addToSet") => match value {
            Bson::String(_) => true,
            Bson::Document(modifier) => {
                modifier.len() == 1 && modifier.get("$each").is_some_and(is_text_list)
            }
            _ => false,
        },
        (FieldShape::TextList, "$pull") => match value {
            Bson::String(_) => true,
            Bson::Document(condition) => {
                condition.len() == 1 && condition.get("$in").is_some_and(is_text_list)
            }
            _ => false,
        },
        _ => false,
    }
}

fn is_text_list(value: &Bson) -> bool {
    matches!(value, Bson::Array(items) if items.iter().all(|item| matches!(item, Bson::String(_))))
}

fn top_level(field: &str) -> &str {
    field.split('.').next().unwrap_or(field)
}
