//! Project coordinator
//!
//! A project is a `Nexus` in `nexuses` plus a `ProjectRecord` in `projects`,
//! both under the same `dbname`. Reads go through a left join driven from
//! the side table. Writes are split per collection and issued base first,
//! then side, with no transaction between them: each collection reports its
//! own `Outcome` and partial failure is left for the caller to surface.

use std::sync::Arc;

use bson::{doc, Bson, Document};
use tracing::{debug, error};

use crate::db::backend::DocumentBackend;
use crate::db::schemas::{
    InputProject, JointProject, Nexus, ProjectRecord, KEY_FIELD, NEXUS_COLLECTION,
    PROJECT_COLLECTION, PROJECT_TYPE, TECHNOLOGY_TYPE,
};
use crate::db::{FieldShape, KeyKind, LeftJoin, Outcome, RecordStore, UpdateToken, ViewOption};
use crate::types::{NexusError, Result};

/// Updatable fields stored on the base nexus
pub const BASE_FIELDS: &[&str] = &["name", "description", "url", "logo"];

/// Fields stored on the side table
pub const SIDE_FIELDS: &[&str] = &["techs", "images"];

/// Stored shape of every updatable project field
const FIELD_SHAPES: &[(&str, FieldShape)] = &[
    ("name", FieldShape::Text),
    ("description", FieldShape::Text),
    ("url", FieldShape::Text),
    ("logo", FieldShape::Text),
    ("techs", FieldShape::TextList),
    ("images", FieldShape::TextList),
];

const TECHS_FIELD: &str = "techs";
const IMAGES_FIELD: &str = "images";

/// Which records a split write applies to
enum Target<'a> {
    Key(&'a str),
    Keys(Vec<Bson>),
}

#[derive(Clone)]
pub struct ProjectService {
    base: RecordStore<Nexus>,
    side: RecordStore<ProjectRecord>,
    join: LeftJoin,
}

impl ProjectService {
    pub async fn new(backend: Arc<dyn DocumentBackend>) -> Result<Self> {
        let base = RecordStore::new(
            Arc::clone(&backend),
            NEXUS_COLLECTION,
            KeyKind::Natural(KEY_FIELD),
        )
        .await?;
        let side =
            RecordStore::new(backend, PROJECT_COLLECTION, KeyKind::Natural(KEY_FIELD)).await?;

        Ok(Self {
            base,
            side,
            join: LeftJoin::new(NEXUS_COLLECTION, KEY_FIELD, KEY_FIELD)
                .with_foreign_match(doc! { "type": PROJECT_TYPE }),
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, key: &str, view: Option<&ViewOption>) -> Option<JointProject> {
        self.side.left_join_one(key, &self.join, view).await
    }

    /// Joined projects matching `filter`; the first page when no view is given
    pub async fn get_many(&self, filter: Document, view: Option<&ViewOption>) -> Vec<JointProject> {
        self.side.left_join_many(filter, &self.join, view).await
    }

    /// Technology nexuses referenced by a project
    ///
    /// Keys in `techs` with no matching technology are skipped. `None` when
    /// the project does not exist.
    pub async fn technologies(&self, key: &str) -> Option<Vec<Nexus>> {
        let record = self
            .get(key, Some(&ViewOption::including([TECHS_FIELD])))
            .await?;

        let filter = doc! {
            "type": TECHNOLOGY_TYPE,
            KEY_FIELD: { "$in": record.techs },
        };
        Some(self.base.get_many(filter, None).await)
    }

    // =========================================================================
    // Adds
    // =========================================================================

    /// Insert both halves of a project; returns `[base, side]`
    pub async fn add(&self, input: InputProject) -> Vec<Outcome> {
        let (nexus, record) = input.split();
        debug!("Adding project '{}'", nexus.dbname);

        let base = self.base.add(&nexus).await;
        let side = self.side.add(&record).await;
        vec![base, side]
    }

    pub async fn add_many(&self, inputs: Vec<InputProject>) -> Vec<Outcome> {
        let (nexuses, records): (Vec<Nexus>, Vec<ProjectRecord>) =
            inputs.into_iter().map(InputProject::split).unzip();

        let base = self.base.add_many(&nexuses).await;
        let side = self.side.add_many(&records).await;
        vec![base, side]
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Reject a token that would store a field in the wrong shape
    pub fn check_token(&self, token: &UpdateToken) -> Result<()> {
        token.check_fields(FIELD_SHAPES)
    }

    pub async fn update(&self, key: &str, token: UpdateToken) -> Vec<Outcome> {
        if let Err(e) = self.check_token(&token) {
            return rejected(e);
        }
        self.update_split(Target::Key(key), &token).await
    }

    /// Resolve `filter` against the joined view, then update both collections by key
    pub async fn update_many(&self, filter: Document, token: UpdateToken) -> Vec<Outcome> {
        if let Err(e) = self.check_token(&token) {
            return rejected(e);
        }
        match self.resolve(filter).await {
            Ok(keys) => self.update_split(Target::Keys(keys), &token).await,
            Err(outcomes) => outcomes,
        }
    }

    async fn update_split(&self, target: Target<'_>, token: &UpdateToken) -> Vec<Outcome> {
        let dropped = token.unknown_fields(&[BASE_FIELDS, SIDE_FIELDS]);
        if !dropped.is_empty() {
            debug!("Dropping non-updatable project fields: {:?}", dropped);
        }

        let base = match token.partition(BASE_FIELDS) {
            Some(sub) => match self.base_filter(&target) {
                Ok(filter) => self.base.update_many(filter, sub).await,
                Err(e) => Outcome::failure(e.to_string()),
            },
            None => Outcome::untouched(),
        };

        let side = match token.partition(SIDE_FIELDS) {
            Some(sub) => match &target {
                Target::Key(key) => self.side.update(key, sub).await,
                Target::Keys(keys) => self.side.update_many(self.side.keys_filter(keys), sub).await,
            },
            None => Outcome::untouched(),
        };

        vec![base, side]
    }

    // =========================================================================
    // Deletes
    // =========================================================================

    pub async fn delete(&self, key: &str) -> Vec<Outcome> {
        let base = match self.base_filter(&Target::Key(key)) {
            Ok(filter) => self.base.delete_many(filter).await,
            Err(e) => Outcome::failure(e.to_string()),
        };
        let side = self.side.delete(key).await;
        vec![base, side]
    }

    /// Resolve `filter` against the joined view, then delete from both collections by key
    pub async fn delete_many(&self, filter: Document) -> Vec<Outcome> {
        let keys = match self.resolve(filter).await {
            Ok(keys) => keys,
            Err(outcomes) => return outcomes,
        };

        let base = match self.base_filter(&Target::Keys(keys.clone())) {
            Ok(filter) => self.base.delete_many(filter).await,
            Err(e) => Outcome::failure(e.to_string()),
        };
        let side = self.side.delete_many(self.side.keys_filter(&keys)).await;
        vec![base, side]
    }

    /// Base rows a project write may touch: the targeted keys, project nexuses only
    fn base_filter(&self, target: &Target<'_>) -> Result<Document> {
        let mut filter = match target {
            Target::Key(key) => self.base.key_filter(key)?,
            Target::Keys(keys) => self.base.keys_filter(keys),
        };
        filter.insert("type", PROJECT_TYPE);
        Ok(filter)
    }

    /// Keys of joined projects matching `filter`, or a failed outcome per collection
    async fn resolve(&self, filter: Document) -> std::result::Result<Vec<Bson>, Vec<Outcome>> {
        match self.side.resolve_joined_keys(filter, &self.join).await {
            Ok(keys) => {
                debug!("Filter resolved to {} project keys", keys.len());
                Ok(keys)
            }
            Err(e) => {
                error!("Resolving project keys failed: {}", e);
                let message = e.to_string();
                Err(vec![Outcome::failure(message.clone()), Outcome::failure(message)])
            }
        }
    }

    // =========================================================================
    // Reference lists
    // =========================================================================

    pub async fn add_images(&self, images: Vec<String>, key: &str) -> Outcome {
        self.side.add_to_list(IMAGES_FIELD, to_bson(images), key).await
    }

    pub async fn remove_images(&self, images: Vec<String>, key: &str) -> Outcome {
        self.side
            .remove_from_list(IMAGES_FIELD, to_bson(images), key)
            .await
    }

    pub async fn add_technologies(&self, techs: Vec<String>, key: &str) -> Outcome {
        self.side.add_to_list(TECHS_FIELD, to_bson(techs), key).await
    }

    pub async fn remove_technologies(&self, techs: Vec<String>, key: &str) -> Outcome {
        self.side
            .remove_from_list(TECHS_FIELD, to_bson(techs), key)
            .await
    }
}

/// One failed outcome per collection for a write that was never issued
fn rejected(e: NexusError) -> Vec<Outcome> {
    debug!("Rejected project update: {}", e);
    let message = e.to_string();
    vec![Outcome::failure(message.clone()), Outcome::failure(message)]
}

fn to_bson(values: Vec<String>) -> Vec<Bson> {
    values.into_iter().map(Bson::String).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::InputNexus;
    use crate::db::{MemoryBackend, OutcomeSet};

    struct Fixture {
        projects: ProjectService,
        backend: Arc<MemoryBackend>,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let projects = ProjectService::new(backend.clone()).await.unwrap();
        Fixture { projects, backend }
    }

    fn input(key: &str, techs: &[&str]) -> InputProject {
        InputProject {
            dbname: Some(key.into()),
            name: Some(key.to_uppercase()),
            description: Some("a project".into()),
            techs: techs.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn token(update: Document) -> UpdateToken {
        UpdateToken::parse(update).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_get_returns_joined_project() {
        let f = fixture().await;
        let outcomes = f.projects.add(input("project-x", &["tech-a"])).await;
        assert!(outcomes.all_ok());
        assert_eq!(outcomes.min_affected(), 1);

        let project = f.projects.get("project-x", None).await.unwrap();
        assert_eq!(project.dbname, "project-x");
        assert_eq!(project.name.as_deref(), Some("PROJECT-X"));
        assert_eq!(project.kind.as_deref(), Some(PROJECT_TYPE));
        assert_eq!(project.techs, vec!["tech-a"]);
        assert_eq!(f.backend.len(NEXUS_COLLECTION), 1);
        assert_eq!(f.backend.len(PROJECT_COLLECTION), 1);
    }

    #[tokio::test]
    async fn test_add_without_key_generates_project_key() {
        let f = fixture().await;
        let outcomes = f.projects.add(InputProject::default()).await;
        assert!(outcomes.all_ok());

        let all = f.projects.get_many(doc! {}, None).await;
        assert_eq!(all.len(), 1);
        let uuid = all[0].dbname.strip_prefix("project-").unwrap();
        assert!(uuid::Uuid::parse_str(uuid).is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_add_reports_both_failures() {
        let f = fixture().await;
        f.projects.add(input("project-x", &[])).await;

        let outcomes = f.projects.add(input("project-x", &[])).await;
        assert!(!outcomes.all_ok());
        assert_eq!(outcomes.failure_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_add_is_not_rolled_back() {
        let f = fixture().await;
        let nexuses: RecordStore<Nexus> = RecordStore::new(
            f.backend.clone(),
            NEXUS_COLLECTION,
            KeyKind::Natural(KEY_FIELD),
        )
        .await
        .unwrap();
        nexuses
            .add(&Nexus {
                dbname: "project-x".into(),
                ..Default::default()
            })
            .await;

        let outcomes = f.projects.add(input("project-x", &["tech-a"])).await;
        assert!(!outcomes[0].ok);
        assert!(outcomes[1].ok);
        assert_eq!(f.backend.len(PROJECT_COLLECTION), 1);
    }

    #[tokio::test]
    async fn test_side_row_without_base_is_not_a_project() {
        let f = fixture().await;
        f.projects.add(input("project-x", &["tech-a"])).await;
        f.projects.add(input("project-y", &[])).await;
        f.projects.base.delete("project-x").await;

        assert!(f.projects.get("project-x", None).await.is_none());
        let all = f.projects.get_many(doc! {}, None).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].dbname, "project-y");

        // Orphans are invisible to filter-based writes too
        let outcomes = f.projects.delete_many(doc! { "techs": "tech-a" }).await;
        assert_eq!(outcomes, vec![Outcome::untouched(), Outcome::untouched()]);
        assert_eq!(f.backend.len(PROJECT_COLLECTION), 2);
    }

    #[tokio::test]
    async fn test_base_row_without_side_is_not_a_project() {
        let f = fixture().await;
        f.projects
            .base
            .add(&Nexus {
                dbname: "tech-a".into(),
                kind: Some(TECHNOLOGY_TYPE.into()),
                ..Default::default()
            })
            .await;

        assert!(f.projects.get("tech-a", None).await.is_none());
        assert!(f.projects.get_many(doc! {}, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_project_colliding_with_technology_leaves_it_alone() {
        let f = fixture().await;
        f.projects
            .base
            .add(&Nexus {
                dbname: "tech-a".into(),
                name: Some("Tech A".into()),
                kind: Some(TECHNOLOGY_TYPE.into()),
                ..Default::default()
            })
            .await;

        let outcomes = f.projects.add(input("tech-a", &["tech-b"])).await;
        assert!(!outcomes[0].ok);
        assert!(outcomes[1].ok);

        assert!(f.projects.get("tech-a", None).await.is_none());
        assert!(f.projects.technologies("tech-a").await.is_none());

        let renamed = f
            .projects
            .update("tech-a", token(doc! { "$set": { "name": "Hijacked" } }))
            .await;
        assert_eq!(renamed[0], Outcome::untouched());

        let outcomes = f.projects.delete("tech-a").await;
        assert_eq!(outcomes[0], Outcome::untouched());
        assert_eq!(outcomes[1], Outcome::success(1));

        let tech = f.projects.base.get_one("tech-a", None).await.unwrap();
        assert_eq!(tech.name.as_deref(), Some("Tech A"));
        assert_eq!(tech.kind.as_deref(), Some(TECHNOLOGY_TYPE));
    }

    #[tokio::test]
    async fn test_positional_side_update_is_rejected() {
        let f = fixture().await;
        f.projects.add(input("project-x", &["tech-a"])).await;

        let outcomes = f
            .projects
            .update("project-x", token(doc! { "$set": { "techs.1000000": "t" } }))
            .await;
        assert!(!outcomes.all_ok());

        let project = f.projects.get("project-x", None).await.unwrap();
        assert_eq!(project.techs, vec!["tech-a"]);
    }

    #[tokio::test]
    async fn test_non_string_list_values_are_rejected() {
        let f = fixture().await;
        f.projects.add(input("project-x", &["tech-a"])).await;

        for update in [
            doc! { "$push": { "techs": 7 } },
            doc! { "$set": { "images": [1, 2] } },
            doc! { "$set": { "name": { "first": "x" } } },
        ] {
            let outcomes = f.projects.update("project-x", token(update)).await;
            assert_eq!(outcomes.failure_messages().len(), 2);
        }
        let outcomes = f
            .projects
            .update_many(doc! { "dbname": "project-x" }, token(doc! { "$push": { "images": 1 } }))
            .await;
        assert!(!outcomes.all_ok());

        // Still readable through the join
        let project = f.projects.get("project-x", None).await.unwrap();
        assert_eq!(project.techs, vec!["tech-a"]);
        assert!(project.images.is_empty());
        assert_eq!(project.name.as_deref(), Some("PROJECT-X"));
    }

    #[tokio::test]
    async fn test_add_many_splits_batch() {
        let f = fixture().await;
        let outcomes = f
            .projects
            .add_many(vec![input("project-a", &[]), input("project-b", &["tech-a"])])
            .await;
        assert_eq!(outcomes, vec![Outcome::success(2), Outcome::success(2)]);

        let b = f.projects.get("project-b", None).await.unwrap();
        assert_eq!(b.techs, vec!["tech-a"]);
    }

    #[tokio::test]
    async fn test_side_only_token_leaves_base_untouched() {
        let f = fixture().await;
        f.projects.add(input("project-x", &["tech-a"])).await;

        let outcomes = f
            .projects
            .update("project-x", token(doc! { "$push": { "techs": "tech-b" } }))
            .await;
        assert_eq!(outcomes[0], Outcome::untouched());
        assert_eq!(outcomes[1], Outcome::success(1));
        assert!(outcomes.all_ok());
        assert_eq!(outcomes.max_affected(), 1);
    }

    #[tokio::test]
    async fn test_update_touches_only_token_fields() {
        let f = fixture().await;
        f.projects.add(input("project-x", &["tech-a"])).await;

        let outcomes = f
            .projects
            .update(
                "project-x",
                token(doc! {
                    "$set": { "url": "https://x.dev", "type": "type-other", "dbname": "project-y" },
                    "$push": { "images": "photo-x" },
                }),
            )
            .await;
        assert_eq!(outcomes, vec![Outcome::success(1), Outcome::success(1)]);

        let project = f.projects.get("project-x", None).await.unwrap();
        assert_eq!(project.url.as_deref(), Some("https://x.dev"));
        assert_eq!(project.name.as_deref(), Some("PROJECT-X"));
        assert_eq!(project.description.as_deref(), Some("a project"));
        assert_eq!(project.kind.as_deref(), Some(PROJECT_TYPE));
        assert_eq!(project.techs, vec!["tech-a"]);
        assert_eq!(project.images, vec!["photo-x"]);
        assert!(f.projects.get("project-y", None).await.is_none());
    }

    #[tokio::test]
    async fn test_update_many_resolves_across_both_collections() {
        let f = fixture().await;
        f.projects
            .add_many(vec![
                input("project-a", &["tech-rust"]),
                input("project-b", &["tech-rust", "tech-go"]),
                input("project-c", &["tech-go"]),
            ])
            .await;

        // Filter on a side field, update a base field
        let outcomes = f
            .projects
            .update_many(
                doc! { "techs": "tech-rust" },
                token(doc! { "$set": { "logo": "rust.svg" } }),
            )
            .await;
        assert_eq!(outcomes, vec![Outcome::success(2), Outcome::untouched()]);

        let with_logo = f.projects.get_many(doc! { "logo": "rust.svg" }, None).await;
        let keys: Vec<&str> = with_logo.iter().map(|p| p.dbname.as_str()).collect();
        assert_eq!(keys, vec!["project-a", "project-b"]);
    }

    #[tokio::test]
    async fn test_delete_then_delete_again() {
        let f = fixture().await;
        f.projects.add(input("project-x", &[])).await;

        let outcomes = f.projects.delete("project-x").await;
        assert_eq!(outcomes, vec![Outcome::success(1), Outcome::success(1)]);
        assert!(f.projects.get("project-x", None).await.is_none());

        let again = f.projects.delete("project-x").await;
        assert!(again.all_ok());
        assert_eq!(again.max_affected(), 0);
    }

    #[tokio::test]
    async fn test_delete_many_matching_nothing() {
        let f = fixture().await;
        f.projects.add(input("project-x", &[])).await;

        let outcomes = f.projects.delete_many(doc! { "name": "nobody" }).await;
        assert_eq!(outcomes, vec![Outcome::untouched(), Outcome::untouched()]);
        assert!(f.projects.get("project-x", None).await.is_some());
    }

    #[tokio::test]
    async fn test_delete_many_by_base_field() {
        let f = fixture().await;
        f.projects
            .add_many(vec![input("project-a", &[]), input("project-b", &[])])
            .await;

        let outcomes = f.projects.delete_many(doc! { "name": "PROJECT-A" }).await;
        assert_eq!(outcomes, vec![Outcome::success(1), Outcome::success(1)]);
        assert_eq!(f.backend.len(NEXUS_COLLECTION), 1);
        assert_eq!(f.backend.len(PROJECT_COLLECTION), 1);
    }

    #[tokio::test]
    async fn test_add_images_twice_keeps_duplicates() {
        let f = fixture().await;
        f.projects.add(input("project-x", &[])).await;

        f.projects.add_images(vec!["photo-a".into()], "project-x").await;
        f.projects.add_images(vec!["photo-a".into()], "project-x").await;
        let project = f.projects.get("project-x", None).await.unwrap();
        assert_eq!(project.images, vec!["photo-a", "photo-a"]);

        let outcome = f
            .projects
            .remove_images(vec!["photo-a".into()], "project-x")
            .await;
        assert_eq!(outcome, Outcome::success(1));
        let project = f.projects.get("project-x", None).await.unwrap();
        assert!(project.images.is_empty());
    }

    #[tokio::test]
    async fn test_technology_list_operations() {
        let f = fixture().await;
        f.projects.add(input("project-x", &["tech-a"])).await;

        f.projects
            .add_technologies(vec!["tech-b".into(), "tech-c".into()], "project-x")
            .await;
        f.projects
            .remove_technologies(vec!["tech-a".into(), "tech-c".into()], "project-x")
            .await;

        let project = f.projects.get("project-x", None).await.unwrap();
        assert_eq!(project.techs, vec!["tech-b"]);
    }

    #[tokio::test]
    async fn test_techs_are_raw_list_and_expansion_skips_missing() {
        let f = fixture().await;
        f.projects.add(input("project-x", &["tech-a", "tech-b"])).await;

        let nexuses = crate::services::NexusService::new(f.backend.clone())
            .await
            .unwrap();
        let tech: Nexus = InputNexus {
            dbname: Some("tech-a".into()),
            name: Some("Tech A".into()),
            kind: Some(TECHNOLOGY_TYPE.into()),
            ..Default::default()
        }
        .into();
        nexuses.add(&tech).await;

        let project = f.projects.get("project-x", None).await.unwrap();
        assert_eq!(project.techs, vec!["tech-a", "tech-b"]);

        let techs = f.projects.technologies("project-x").await.unwrap();
        assert_eq!(techs.len(), 1);
        assert_eq!(techs[0].dbname, "tech-a");

        assert!(f.projects.technologies("project-missing").await.is_none());
    }

    #[tokio::test]
    async fn test_get_many_projects_and_sorts_after_join() {
        let f = fixture().await;
        f.projects
            .add_many(vec![
                input("project-a", &["tech-a"]),
                input("project-c", &["tech-c"]),
                input("project-b", &["tech-b"]),
            ])
            .await;

        let view = ViewOption {
            includes: Some(vec!["dbname".into(), "techs".into()]),
            order_by: Some("name".into()),
            order: Some("desc".into()),
            per_page: 2,
            ..Default::default()
        };
        let page = f.projects.get_many(doc! {}, Some(&view)).await;

        // Sorted on a base field that the projection then strips
        let keys: Vec<&str> = page.iter().map(|p| p.dbname.as_str()).collect();
        assert_eq!(keys, vec!["project-c", "project-b"]);
        assert_eq!(page[0].techs, vec!["tech-c"]);
        assert!(page.iter().all(|p| p.name.is_none() && p.description.is_none()));
        assert!(page.iter().all(|p| p.kind.is_none()));

        let single = f.projects.get("project-a", Some(&view)).await.unwrap();
        assert_eq!(single.techs, vec!["tech-a"]);
        assert!(single.name.is_none());
    }

    #[tokio::test]
    async fn test_get_many_pages_by_default() {
        let f = fixture().await;
        let inputs = (0..15)
            .map(|i| input(&format!("project-{:02}", i), &[]))
            .collect();
        f.projects.add_many(inputs).await;

        assert_eq!(f.projects.get_many(doc! {}, None).await.len(), 10);

        let view = ViewOption {
            page: 2,
            order_by: Some("dbname".into()),
            ..Default::default()
        };
        let second = f.projects.get_many(doc! {}, Some(&view)).await;
        assert_eq!(second.len(), 5);
        assert_eq!(second[0].dbname, "project-10");
    }
}
