//! Query evaluation for the in-memory backend
//!
//! Implements the slice of MongoDB's query and update language that the
//! gateway issues or accepts from clients: field equality (with array
//! containment), comparison and set operators, logical combinators, the
//! common update operators, projections and sorts. Anything else is rejected
//! as a bad request instead of being silently mis-evaluated.

use bson::{Bson, Document};
use std::cmp::Ordering;

use crate::types::{NexusError, Result};

/// Resolve a dotted path (`a.b.0`) inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// =============================================================================
// Filters
// =============================================================================

/// Evaluate a filter document against a document
pub fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(NexusError::BadRequest(format!(
                    "unsupported top-level query operator '{}'",
                    op
                )));
            }
            path => field_matches(lookup(doc, path), condition)?,
        };

        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(operator: &str, condition: &'a Bson) -> Result<Vec<&'a Document>> {
    let Bson::Array(items) = condition else {
        return Err(NexusError::BadRequest(format!(
            "'{}' expects an array of filters",
            operator
        )));
    };
    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                NexusError::BadRequest(format!("'{}' entries must be documents", operator))
            })
        })
        .collect()
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Evaluate one field condition: a literal or an operator document
pub fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => {
            for (op, arg) in ops {
                if !apply_operator(value, op, arg)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(equals_or_contains(value, literal)),
    }
}

fn apply_operator(value: Option<&Bson>, op: &str, arg: &Bson) -> Result<bool> {
    let result = match op {
        "$eq" => equals_or_contains(value, arg),
        "$ne" => !equals_or_contains(value, arg),
        "$gt" => compares(value, arg, |o| o == Ordering::Greater),
        "$gte" => compares(value, arg, |o| o != Ordering::Less),
        "$lt" => compares(value, arg, |o| o == Ordering::Less),
        "$lte" => compares(value, arg, |o| o != Ordering::Greater),
        "$in" => operand_array(op, arg)?
            .iter()
            .any(|candidate| equals_or_contains(value, candidate)),
        "$nin" => !operand_array(op, arg)?
            .iter()
            .any(|candidate| equals_or_contains(value, candidate)),
        "$all" => operand_array(op, arg)?
            .iter()
            .all(|candidate| equals_or_contains(value, candidate)),
        "$exists" => value.is_some() == is_truthy(arg),
        "$size" => match (value, as_f64(arg)) {
            (Some(Bson::Array(items)), Some(size)) => items.len() as f64 == size,
            _ => false,
        },
        "$not" => !field_matches(value, arg)?,
        other => {
            return Err(NexusError::BadRequest(format!(
                "unsupported query operator '{}'",
                other
            )));
        }
    };
    Ok(result)
}

fn operand_array<'a>(op: &str, arg: &'a Bson) -> Result<&'a Vec<Bson>> {
    arg.as_array()
        .ok_or_else(|| NexusError::BadRequest(format!("'{}' expects an array", op)))
}

/// Equality with MongoDB's array semantics: an array field matches a scalar
/// it contains, and a missing field matches `null`
fn equals_or_contains(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(Bson::Array(items)) => {
            values_equal(&Bson::Array(items.clone()), target)
                || items.iter().any(|item| values_equal(item, target))
        }
        Some(v) => values_equal(v, target),
    }
}

fn compares(value: Option<&Bson>, target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, target).is_some_and(&accept)),
        Some(v) => compare_values(v, target).is_some_and(accept),
        None => false,
    }
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map(|n| n != 0.0).unwrap_or(true),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Equality that treats all numeric types as one
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between values of comparable types, `None` otherwise
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

// =============================================================================
// Sort and projection
// =============================================================================

/// Cross-type ordering rank, following MongoDB's comparison order
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

fn sort_key_cmp(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

/// Stable multi-key sort; negative directions sort descending
pub fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let mut ordering = sort_key_cmp(lookup(a, field), lookup(b, field));
            if as_f64(direction).is_some_and(|d| d < 0.0) {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Apply a top-level field projection
pub fn project(doc: &Document, projection: &Document) -> Result<Document> {
    let mut include_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();

    for (field, flag) in projection {
        let keep = is_truthy(flag);
        if field == "_id" {
            include_id = keep;
        } else if keep {
            included.push(field.as_str());
        } else {
            excluded.push(field.as_str());
        }
    }

    if !included.is_empty() && !excluded.is_empty() {
        return Err(NexusError::BadRequest(format!(
            "Cannot do exclusion on field {} in inclusion projection",
            excluded[0]
        )));
    }

    if !included.is_empty() {
        let mut result = Document::new();
        if include_id {
            if let Some(id) = doc.get("_id") {
                result.insert("_id", id.clone());
            }
        }
        for field in included {
            let top = field.split('.').next().unwrap_or(field);
            if let Some(value) = doc.get(top) {
                result.insert(top, value.clone());
            }
        }
        return Ok(result);
    }

    let mut result = doc.clone();
    if !include_id {
        result.remove("_id");
    }
    for field in excluded {
        unset_path(&mut result, field);
    }
    Ok(result)
}

// =============================================================================
// Updates
// =============================================================================

/// Apply an update document in place; returns whether anything changed
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool> {
    if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
        return Err(NexusError::BadRequest(
            "update document requires atomic operators".to_string(),
        ));
    }

    let before = doc.clone();

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(NexusError::BadRequest(format!(
                "'{}' expects a document of fields",
                op
            )));
        };

        for (path, arg) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(NexusError::BadRequest(
                    "the immutable field '_id' cannot be updated".to_string(),
                ));
            }

            match op.as_str() {
                "$set" => set_path(doc, path, arg.clone())?,
                "$unset" => unset_path(doc, path),
                "$inc" => {
                    let current = lookup(doc, path).cloned();
                    let next = match current {
                        None => arg.clone(),
                        Some(value) => add_numbers(&value, arg)?,
                    };
                    set_path(doc, path, next)?;
                }
                "$push" => {
                    let mut items = array_at(doc, path, op)?.unwrap_or_default();
                    items.extend(each_values(arg));
                    set_path(doc, path, Bson::Array(items))?;
                }
                "$addToSet" => {
                    let mut items = array_at(doc, path, op)?.unwrap_or_default();
                    for value in each_values(arg) {
                        if !items.iter().any(|item| values_equal(item, &value)) {
                            items.push(value);
                        }
                    }
                    set_path(doc, path, Bson::Array(items))?;
                }
                "$pull" => {
                    if let Some(items) = array_at(doc, path, op)? {
                        let mut kept = Vec::with_capacity(items.len());
                        for item in items {
                            if !pull_matches(&item, arg)? {
                                kept.push(item);
                            }
                        }
                        set_path(doc, path, Bson::Array(kept))?;
                    }
                }
                other => {
                    return Err(NexusError::BadRequest(format!(
                        "unsupported update operator '{}'",
                        other
                    )));
                }
            }
        }
    }

    Ok(*doc != before)
}

fn array_at(doc: &Document, path: &str, op: &str) -> Result<Option<Vec<Bson>>> {
    match lookup(doc, path) {
        None => Ok(None),
        Some(Bson::Array(items)) => Ok(Some(items.clone())),
        Some(_) => Err(NexusError::BadRequest(format!(
            "'{}' requires field '{}' to be an array",
            op, path
        ))),
    }
}

/// Values for `$push`/`$addToSet`, unwrapping `{ $each: [...] }`
fn each_values(arg: &Bson) -> Vec<Bson> {
    if let Bson::Document(modifier) = arg {
        if let Some(Bson::Array(values)) = modifier.get("$each") {
            return values.clone();
        }
    }
    vec![arg.clone()]
}

fn pull_matches(item: &Bson, condition: &Bson) -> Result<bool> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => field_matches(Some(item), condition),
        literal => Ok(values_equal(item, literal)),
    }
}

fn add_numbers(current: &Bson, delta: &Bson) -> Result<Bson> {
    let sum = match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(n) => Bson::Int32(n),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(*a as i64 + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (a, b) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => {
                return Err(NexusError::BadRequest(
                    "'$inc' requires numeric values".to_string(),
                ));
            }
        },
    };
    Ok(sum)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            set_in_value(child, rest, value)
        }
    }
}

fn set_in_value(target: &mut Bson, path: &str, value: Bson) -> Result<()> {
    match target {
        Bson::Document(inner) => set_path(inner, path, value),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let index: usize = head.parse().map_err(|_| {
                NexusError::BadRequest(format!("cannot use '{}' as an array index", head))
            })?;
            if index > items.len() {
                return Err(NexusError::BadRequest(format!(
                    "array index {} is past the end of an array of length {}",
                    index,
                    items.len()
                )));
            }
            if index == items.len() {
                items.push(Bson::Null);
            }
            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => set_in_value(&mut items[index], rest, value),
            }
        }
        _ => Err(NexusError::BadRequest(format!(
            "cannot create field '{}' in a non-document value",
            path
        ))),
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn project_doc() -> Document {
        doc! {
            "dbname": "project-endian",
            "name": "Endian",
            "url": Bson::Null,
            "stars": 12,
            "techs": ["tech-csharp", "tech-angular"],
            "meta": { "owner": "wc" },
        }
    }

    #[test]
    fn test_positional_set_cannot_leave_gaps() {
        let mut doc = project_doc();
        apply_update(&mut doc, &doc! { "$set": { "techs.1": "tech-rust" } }).unwrap();
        apply_update(&mut doc, &doc! { "$set": { "techs.2": "tech-go" } }).unwrap();
        assert_eq!(doc.get_array("techs").unwrap().len(), 3);

        let err = apply_update(&mut doc, &doc! { "$set": { "techs.1000000": "t" } });
        assert!(matches!(err, Err(NexusError::BadRequest(_))));
        assert_eq!(doc.get_array("techs").unwrap().len(), 3);
    }

    #[test]
    fn test_lookup_paths() {
        let doc = project_doc();
        assert_eq!(lookup(&doc, "meta.owner"), Some(&Bson::String("wc".into())));
        assert_eq!(lookup(&doc, "techs.1"), Some(&Bson::String("tech-angular".into())));
        assert_eq!(lookup(&doc, "missing.path"), None);
    }

    #[test]
    fn test_empty_filter_matches() {
        assert!(matches(&project_doc(), &doc! {}).unwrap());
    }

    #[test]
    fn test_equality_and_array_containment() {
        let doc = project_doc();
        assert!(matches(&doc, &doc! { "dbname": "project-endian" }).unwrap());
        assert!(matches(&doc, &doc! { "techs": "tech-angular" }).unwrap());
        assert!(!matches(&doc, &doc! { "techs": "tech-java" }).unwrap());
        assert!(matches(&doc, &doc! { "url": Bson::Null }).unwrap());
        assert!(matches(&doc, &doc! { "logo": Bson::Null }).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let doc = project_doc();
        assert!(matches(&doc, &doc! { "stars": { "$gt": 10 } }).unwrap());
        assert!(matches(&doc, &doc! { "stars": { "$gte": 12.0, "$lt": 13 } }).unwrap());
        assert!(!matches(&doc, &doc! { "stars": { "$lte": 11 } }).unwrap());
        assert!(!matches(&doc, &doc! { "name": { "$gt": 5 } }).unwrap());
    }

    #[test]
    fn test_set_operators() {
        let doc = project_doc();
        assert!(matches(&doc, &doc! { "dbname": { "$in": ["a", "project-endian"] } }).unwrap());
        assert!(!matches(&doc, &doc! { "dbname": { "$in": [] } }).unwrap());
        assert!(matches(&doc, &doc! { "techs": { "$nin": ["tech-java"] } }).unwrap());
        assert!(matches(&doc, &doc! { "techs": { "$all": ["tech-csharp", "tech-angular"] } }).unwrap());
        assert!(matches(&doc, &doc! { "techs": { "$size": 2 } }).unwrap());
        assert!(matches(&doc, &doc! { "logo": { "$exists": false } }).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = project_doc();
        assert!(matches(
            &doc,
            &doc! { "$or": [ { "name": "Other" }, { "stars": 12 } ] }
        )
        .unwrap());
        assert!(!matches(
            &doc,
            &doc! { "$and": [ { "name": "Endian" }, { "stars": 1 } ] }
        )
        .unwrap());
        assert!(matches(&doc, &doc! { "$nor": [ { "name": "Other" } ] }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$not": { "$eq": "Other" } } }).unwrap());
    }

    #[test]
    fn test_unsupported_operators_are_rejected() {
        let doc = project_doc();
        assert!(matches(&doc, &doc! { "$where": "1" }).is_err());
        assert!(matches(&doc, &doc! { "name": { "$regex": "End" } }).is_err());
    }

    #[test]
    fn test_sort_documents() {
        let mut docs = vec![
            doc! { "dbname": "b", "rank": 2 },
            doc! { "dbname": "a", "rank": 2 },
            doc! { "dbname": "c", "rank": 1 },
            doc! { "dbname": "d" },
        ];
        sort_documents(&mut docs, &doc! { "rank": -1, "dbname": 1 });
        let order: Vec<&str> = docs.iter().map(|d| d.get_str("dbname").unwrap()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_projection_modes() {
        let mut doc = project_doc();
        doc.insert("_id", 7);

        let included = project(&doc, &doc! { "dbname": 1, "name": 1 }).unwrap();
        assert_eq!(included, doc! { "_id": 7, "dbname": "project-endian", "name": "Endian" });

        let excluded = project(&doc, &doc! { "techs": 0, "meta": 0, "_id": 0 }).unwrap();
        assert!(!excluded.contains_key("techs"));
        assert!(!excluded.contains_key("_id"));
        assert!(excluded.contains_key("stars"));

        assert!(project(&doc, &doc! { "name": 1, "url": 0 }).is_err());
    }

    #[test]
    fn test_set_and_unset() {
        let mut doc = project_doc();
        assert!(apply_update(&mut doc, &doc! { "$set": { "url": "https://endian.dev" } }).unwrap());
        assert_eq!(doc.get_str("url").unwrap(), "https://endian.dev");

        assert!(apply_update(&mut doc, &doc! { "$set": { "meta.owner": "nx", "meta.year": 2020 } }).unwrap());
        assert_eq!(lookup(&doc, "meta.year"), Some(&Bson::Int32(2020)));

        assert!(apply_update(&mut doc, &doc! { "$unset": { "meta": "" } }).unwrap());
        assert!(!doc.contains_key("meta"));
    }

    #[test]
    fn test_update_reports_unchanged() {
        let mut doc = project_doc();
        let changed = apply_update(&mut doc, &doc! { "$set": { "name": "Endian" } }).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_push_and_pull() {
        let mut doc = project_doc();
        apply_update(&mut doc, &doc! { "$push": { "techs": "tech-csharp" } }).unwrap();
        apply_update(&mut doc, &doc! { "$push": { "images": { "$each": ["p1", "p2"] } } }).unwrap();
        assert_eq!(doc.get_array("techs").unwrap().len(), 3);
        assert_eq!(doc.get_array("images").unwrap().len(), 2);

        apply_update(&mut doc, &doc! { "$pull": { "techs": "tech-csharp" } }).unwrap();
        assert_eq!(doc.get_array("techs").unwrap(), &vec![Bson::String("tech-angular".into())]);

        apply_update(&mut doc, &doc! { "$pull": { "images": { "$in": ["p1", "p2"] } } }).unwrap();
        assert!(doc.get_array("images").unwrap().is_empty());
    }

    #[test]
    fn test_add_to_set_and_inc() {
        let mut doc = project_doc();
        apply_update(&mut doc, &doc! { "$addToSet": { "techs": { "$each": ["tech-angular", "tech-go"] } } }).unwrap();
        assert_eq!(doc.get_array("techs").unwrap().len(), 3);

        apply_update(&mut doc, &doc! { "$inc": { "stars": 3, "views": 1 } }).unwrap();
        assert_eq!(doc.get_i32("stars").unwrap(), 15);
        assert_eq!(doc.get_i32("views").unwrap(), 1);
    }

    #[test]
    fn test_invalid_updates() {
        let mut doc = project_doc();
        assert!(apply_update(&mut doc, &doc! { "name": "replacement" }).is_err());
        assert!(apply_update(&mut doc, &doc! { "$rename": { "name": "title" } }).is_err());
        assert!(apply_update(&mut doc, &doc! { "$push": { "name": "x" } }).is_err());
        assert!(apply_update(&mut doc, &doc! { "$set": { "_id": 1 } }).is_err());
    }
}
