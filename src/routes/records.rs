//! Nexus and Photo routes
//!
//! - GET    /api/{entity}                 - list (`?condition=&options=`)
//! - GET    /api/{entity}/dbname/{key}    - single (`?options=`)
//! - POST   /api/{entity}/addsingle       - add one
//! - POST   /api/{entity}/addlist         - add several
//! - PATCH  /api/{entity}/dbname/{key}    - update one
//! - PATCH  /api/{entity}                 - update by condition
//! - DELETE /api/{entity}/dbname/{key}    - delete one
//! - DELETE /api/{entity}                 - delete by condition
//!
//! Photo adds may name a `projectDBName`; the new photos are then appended
//! to that project's images.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::schemas::{Nexus, Photo};
use crate::db::Outcome;
use crate::routes::common::{
    add_response, change_response, error_response, json_response, not_found_response, BoxBody,
    Change, JsonBody, ListQuery,
};
use crate::server::AppState;
use crate::services::{CatalogRecord, CatalogService, Services};
use crate::types::Result;

/// HTTP surface of a catalog record type
pub trait CatalogRoute: CatalogRecord {
    /// Body field of `addsingle`
    const SINGLE_FIELD: &'static str;
    /// Body field of `addlist`
    const LIST_FIELD: &'static str;
    /// Whether adds accept `projectDBName` and list the new keys in that project's images
    const PROJECT_IMAGES: bool;

    fn service(services: &Services) -> &CatalogService<Self>;
}

impl CatalogRoute for Nexus {
    const SINGLE_FIELD: &'static str = "newNexus";
    const LIST_FIELD: &'static str = "newNexuses";
    const PROJECT_IMAGES: bool = false;

    fn service(services: &Services) -> &CatalogService<Self> {
        &services.nexus
    }
}

impl CatalogRoute for Photo {
    const SINGLE_FIELD: &'static str = "newPhoto";
    const LIST_FIELD: &'static str = "newPhotos";
    const PROJECT_IMAGES: bool = true;

    fn service(services: &Services) -> &CatalogService<Self> {
        &services.photo
    }
}

/// Route a request under `/api/{entity}`; `segments` is what follows the entity
pub async fn handle_catalog_request<T: CatalogRoute>(
    state: Arc<AppState>,
    req: Request<Incoming>,
    segments: &[String],
) -> Response<BoxBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = ListQuery::from_request(&req);
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    let result = match (method, segments.as_slice()) {
        (Method::GET, []) => match query {
            Ok(query) => get_list::<T>(&state, query).await,
            Err(e) => Err(e),
        },
        (Method::GET, [action, key]) if action.eq_ignore_ascii_case("dbname") => match query {
            Ok(query) => get_single::<T>(&state, query, key).await,
            Err(e) => Err(e),
        },
        (Method::POST, [action]) if action.eq_ignore_ascii_case("addsingle") => {
            add_single::<T>(&state, req).await
        }
        (Method::POST, [action]) if action.eq_ignore_ascii_case("addlist") => {
            add_list::<T>(&state, req).await
        }
        (Method::PATCH, [action, key]) if action.eq_ignore_ascii_case("dbname") => {
            update_single::<T>(&state, req, key).await
        }
        (Method::PATCH, []) => update_list::<T>(&state, req).await,
        (Method::DELETE, [action, key]) if action.eq_ignore_ascii_case("dbname") => {
            Ok(delete_single::<T>(&state, key).await)
        }
        (Method::DELETE, []) => delete_list::<T>(&state, req).await,
        _ => Ok(not_found_response(&path)),
    };

    result.unwrap_or_else(error_response)
}

async fn get_single<T: CatalogRoute>(
    state: &AppState,
    query: ListQuery,
    key: &str,
) -> Result<Response<BoxBody>> {
    let view = query.view()?;

    Ok(match T::service(&state.services).get(key, view.as_ref()).await {
        Some(record) => json_response(StatusCode::OK, &record),
        None => json_response(StatusCode::NOT_FOUND, &serde_json::json!({})),
    })
}

async fn get_list<T: CatalogRoute>(
    state: &AppState,
    query: ListQuery,
) -> Result<Response<BoxBody>> {
    let condition = query.condition()?;
    let view = query.view()?;

    let records = T::service(&state.services)
        .get_many(condition, view.as_ref())
        .await;
    Ok(json_response(StatusCode::OK, &records))
}

async fn add_single<T: CatalogRoute>(
    state: &AppState,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let input: T::Input = body.required(T::SINGLE_FIELD)?;
    let project = project_key::<T>(&mut body)?;

    let record: T = input.into();
    let key = record.key().to_string();
    let outcome = T::service(&state.services).add(&record).await;

    let subject = format!("{} {}", T::ENTITY, key);
    if outcome.ok {
        info!("Added {}", subject);
        if let Some(project) = project {
            return Ok(attach_images(state, vec![key], &project, outcome, subject).await);
        }
    }
    Ok(add_response(&[outcome], &subject))
}

async fn add_list<T: CatalogRoute>(
    state: &AppState,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let inputs: Vec<T::Input> = body.required(T::LIST_FIELD)?;
    let project = project_key::<T>(&mut body)?;

    let records: Vec<T> = inputs.into_iter().map(Into::into).collect();
    let keys: Vec<String> = records.iter().map(|r| r.key().to_string()).collect();
    let outcome = T::service(&state.services).add_many(&records).await;

    let subject = format!("{} {}s", records.len(), T::ENTITY);
    if outcome.ok {
        info!("Added {}", subject);
        if let Some(project) = project {
            return Ok(attach_images(state, keys, &project, outcome, subject).await);
        }
    }
    Ok(add_response(&[outcome], &subject))
}

/// `projectDBName` from an add body, for types that support it
fn project_key<T: CatalogRoute>(body: &mut JsonBody) -> Result<Option<String>> {
    if !T::PROJECT_IMAGES {
        return Ok(None);
    }
    Ok(body
        .optional::<String>("projectDBName")?
        .filter(|key| !key.trim().is_empty()))
}

/// List freshly added records in a project's images
///
/// The records stay added even if the project is missing; the response
/// reports the add and says whether the project was updated.
async fn attach_images(
    state: &AppState,
    keys: Vec<String>,
    project: &str,
    added: Outcome,
    subject: String,
) -> Response<BoxBody> {
    let attached = state.services.project.add_images(keys, project).await;
    let subject = if attached.ok && attached.num_affected > 0 {
        format!("{} to {}", subject, project)
    } else {
        warn!("Added {} but could not list them in project {}", subject, project);
        format!("{} (project {} not updated)", subject, project)
    };
    add_response(&[added], &subject)
}

async fn update_single<T: CatalogRoute>(
    state: &AppState,
    req: Request<Incoming>,
    key: &str,
) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let token = body.token()?;
    T::service(&state.services).check_token(&token)?;

    let outcome = T::service(&state.services).update(key, token).await;
    Ok(change_response(&[outcome], Change::Update, key))
}

async fn update_list<T: CatalogRoute>(
    state: &AppState,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let condition = body.condition("updating")?;
    let token = body.token()?;
    T::service(&state.services).check_token(&token)?;

    let outcome = T::service(&state.services)
        .update_many(condition, token)
        .await;
    Ok(change_response(
        &[outcome],
        Change::Update,
        &format!("the matching {}s", T::ENTITY),
    ))
}

async fn delete_single<T: CatalogRoute>(state: &AppState, key: &str) -> Response<BoxBody> {
    let outcome = T::service(&state.services).delete(key).await;
    change_response(&[outcome], Change::Delete, key)
}

async fn delete_list<T: CatalogRoute>(
    state: &AppState,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let condition = body.condition("deleting")?;

    let outcome = T::service(&state.services).delete_many(condition).await;
    Ok(change_response(
        &[outcome],
        Change::Delete,
        &format!("the matching {}s", T::ENTITY),
    ))
}
