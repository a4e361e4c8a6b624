//! View options: pagination, projection and sort
//!
//! A `ViewOption` arrives with a request and is translated into a
//! `FindView`, the set of directives a backend applies to a query.
//! Translation never fails; `ViewOption::validate` is the place where
//! contradictory options are rejected.

use bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::types::NexusError;

/// Page size used when the caller gives none (or a non-positive one)
pub const DEFAULT_PER_PAGE: i64 = 10;

/// Per-request view directives
///
/// Field names accept both camelCase and PascalCase so that clients of the
/// old API keep working.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOption {
    #[serde(default, alias = "Includes")]
    pub includes: Option<Vec<String>>,

    #[serde(default, alias = "Excludes")]
    pub excludes: Option<Vec<String>>,

    #[serde(default, alias = "Page")]
    pub page: i64,

    #[serde(default, alias = "PerPage", alias = "perpage")]
    pub per_page: i64,

    #[serde(default, alias = "OrderBy", alias = "orderby")]
    pub order_by: Option<String>,

    #[serde(default, alias = "Order")]
    pub order: Option<String>,
}

/// Backend-level directives produced from a `ViewOption`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindView {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl ViewOption {
    /// A view that only restricts the returned fields
    pub fn including<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            includes: Some(fields.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Reject options that a document store cannot execute
    ///
    /// Mixing inclusion and exclusion produces a projection MongoDB refuses,
    /// and a page whose offset does not fit in an i64 cannot be skipped to.
    pub fn validate(&self) -> Result<(), NexusError> {
        let has_includes = self.includes.as_ref().is_some_and(|f| !f.is_empty());
        let has_excludes = self.excludes.as_ref().is_some_and(|f| !f.is_empty());
        if has_includes && has_excludes {
            return Err(NexusError::BadRequest(
                "includes and excludes cannot be combined".to_string(),
            ));
        }
        let (page, per_page) = self.effective_page();
        if (page - 1).checked_mul(per_page).is_none() {
            return Err(NexusError::BadRequest(format!(
                "page {} of {} per page is out of range",
                page, per_page
            )));
        }
        Ok(())
    }

    fn effective_page(&self) -> (i64, i64) {
        let per_page = if self.per_page > 0 {
            self.per_page
        } else {
            DEFAULT_PER_PAGE
        };
        let page = if self.page > 0 { self.page } else { 1 };
        (page, per_page)
    }

    /// Effective (skip, limit) for this view
    ///
    /// The offset saturates at `i64::MAX`; `validate` rejects such views.
    pub fn pagination(&self) -> (u64, i64) {
        let (page, per_page) = self.effective_page();
        let skip = (page - 1).saturating_mul(per_page);
        (skip.unsigned_abs(), per_page)
    }

    /// Field projection; `None` when neither list has entries
    pub fn projection(&self) -> Option<Document> {
        let mut projection = Document::new();

        for field in self.includes.iter().flatten() {
            projection.insert(field.as_str(), 1);
        }
        for field in self.excludes.iter().flatten() {
            projection.insert(field.as_str(), 0);
        }

        if projection.is_empty() {
            None
        } else {
            Some(projection)
        }
    }

    /// Sort document; only `"desc"` (exact match) sorts descending
    pub fn sort(&self) -> Option<Document> {
        let field = self.order_by.as_deref()?;
        let direction = if self.order.as_deref() == Some("desc") {
            -1
        } else {
            1
        };
        Some(doc! { field: direction })
    }

    /// Full translation into backend directives
    pub fn to_find_view(&self) -> FindView {
        let (skip, limit) = self.pagination();
        FindView {
            projection: self.projection(),
            sort: self.sort(),
            skip: Some(skip),
            limit: Some(limit),
        }
    }
}

impl FindView {
    /// Directives for an optional view; no view means no restrictions
    pub fn from_option(view: Option<&ViewOption>) -> Self {
        view.map(ViewOption::to_find_view).unwrap_or_default()
    }

    /// Like `from_option`, but an absent view still yields the first page
    pub fn paged_or_default(view: Option<&ViewOption>) -> Self {
        match view {
            Some(v) => v.to_find_view(),
            None => ViewOption::default().to_find_view(),
        }
    }
}
