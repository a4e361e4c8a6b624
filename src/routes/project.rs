//! Project routes
//!
//! Same surface as the catalog routes, plus the reference lists:
//!
//! - GET         /api/project/dbname/{key}/techs   - technology nexuses
//! - POST/DELETE /api/project/dbname/{key}/techs   - `{"techs": [...]}`
//! - POST/DELETE /api/project/dbname/{key}/images  - `{"images": [...]}`
//!
//! Every write touches two collections; the response ANDs their success and
//! reports the smallest count for adds and the largest for updates and deletes.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::info;

use crate::db::schemas::InputProject;
use crate::db::Outcome;
use crate::routes::common::{
    add_response, change_response, error_response, json_response, not_found_response, BoxBody,
    Change, JsonBody, ListQuery,
};
use crate::server::AppState;
use crate::services::ProjectService;
use crate::types::Result;

/// Which reference list a sub-route edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceList {
    Techs,
    Images,
}

impl ReferenceList {
    fn parse(segment: &str) -> Option<Self> {
        if segment.eq_ignore_ascii_case("techs") {
            Some(Self::Techs)
        } else if segment.eq_ignore_ascii_case("images") {
            Some(Self::Images)
        } else {
            None
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Techs => "techs",
            Self::Images => "images",
        }
    }
}

/// Route a request under `/api/project`; `segments` is what follows `project`
pub async fn handle_project_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
    segments: &[String],
) -> Response<BoxBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = ListQuery::from_request(&req);
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
    let projects = &state.services.project;

    let result = match (method, segments.as_slice()) {
        (Method::GET, []) => match query {
            Ok(query) => get_list(projects, query).await,
            Err(e) => Err(e),
        },
        (Method::GET, [action, key]) if action.eq_ignore_ascii_case("dbname") => match query {
            Ok(query) => get_single(projects, query, key).await,
            Err(e) => Err(e),
        },
        (Method::GET, [action, key, list])
            if action.eq_ignore_ascii_case("dbname")
                && ReferenceList::parse(list) == Some(ReferenceList::Techs) =>
        {
            Ok(get_technologies(projects, key).await)
        }
        (Method::POST, [action]) if action.eq_ignore_ascii_case("addsingle") => {
            add_single(projects, req).await
        }
        (Method::POST, [action]) if action.eq_ignore_ascii_case("addlist") => {
            add_list(projects, req).await
        }
        (Method::PATCH, [action, key]) if action.eq_ignore_ascii_case("dbname") => {
            update_single(projects, req, key).await
        }
        (Method::PATCH, []) => update_list(projects, req).await,
        (Method::DELETE, [action, key]) if action.eq_ignore_ascii_case("dbname") => {
            Ok(delete_single(projects, key).await)
        }
        (Method::DELETE, []) => delete_list(projects, req).await,
        (Method::POST, [action, key, list]) if action.eq_ignore_ascii_case("dbname") => {
            match ReferenceList::parse(list) {
                Some(list) => edit_list(projects, req, key, list, true).await,
                None => Ok(not_found_response(&path)),
            }
        }
        (Method::DELETE, [action, key, list]) if action.eq_ignore_ascii_case("dbname") => {
            match ReferenceList::parse(list) {
                Some(list) => edit_list(projects, req, key, list, false).await,
                None => Ok(not_found_response(&path)),
            }
        }
        _ => Ok(not_found_response(&path)),
    };

    result.unwrap_or_else(error_response)
}

async fn get_single(
    projects: &ProjectService,
    query: ListQuery,
    key: &str,
) -> Result<Response<BoxBody>> {
    let view = query.view()?;

    Ok(match projects.get(key, view.as_ref()).await {
        Some(project) => json_response(StatusCode::OK, &project),
        None => json_response(StatusCode::NOT_FOUND, &serde_json::json!({})),
    })
}

async fn get_list(projects: &ProjectService, query: ListQuery) -> Result<Response<BoxBody>> {
    let condition = query.condition()?;
    let view = query.view()?;

    let list = projects.get_many(condition, view.as_ref()).await;
    Ok(json_response(StatusCode::OK, &list))
}

async fn get_technologies(projects: &ProjectService, key: &str) -> Response<BoxBody> {
    match projects.technologies(key).await {
        Some(techs) => json_response(StatusCode::OK, &techs),
        None => json_response(StatusCode::NOT_FOUND, &serde_json::json!({})),
    }
}

async fn add_single(projects: &ProjectService, req: Request<Incoming>) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let input: InputProject = body.required("newProject")?;

    let subject = format!(
        "project {}",
        input
            .name
            .as_deref()
            .or(input.dbname.as_deref())
            .unwrap_or("(generated key)")
    );
    let outcomes = projects.add(input).await;
    if outcomes.iter().all(|o| o.ok) {
        info!("Added {}", subject);
    }
    Ok(add_response(&outcomes, &subject))
}

async fn add_list(projects: &ProjectService, req: Request<Incoming>) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let inputs: Vec<InputProject> = body.required("newProjects")?;

    let subject = format!("{} projects", inputs.len());
    let outcomes = projects.add_many(inputs).await;
    Ok(add_response(&outcomes, &subject))
}

async fn update_single(
    projects: &ProjectService,
    req: Request<Incoming>,
    key: &str,
) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let token = body.token()?;
    projects.check_token(&token)?;

    let outcomes = projects.update(key, token).await;
    Ok(change_response(&outcomes, Change::Update, key))
}

async fn update_list(projects: &ProjectService, req: Request<Incoming>) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let condition = body.condition("updating")?;
    let token = body.token()?;
    projects.check_token(&token)?;

    let outcomes = projects.update_many(condition, token).await;
    Ok(change_response(&outcomes, Change::Update, "the matching projects"))
}

async fn delete_single(projects: &ProjectService, key: &str) -> Response<BoxBody> {
    let outcomes = projects.delete(key).await;
    change_response(&outcomes, Change::Delete, key)
}

async fn delete_list(projects: &ProjectService, req: Request<Incoming>) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let condition = body.condition("deleting")?;

    let outcomes = projects.delete_many(condition).await;
    Ok(change_response(&outcomes, Change::Delete, "the matching projects"))
}

/// Push to or pull from one of a project's reference lists
async fn edit_list(
    projects: &ProjectService,
    req: Request<Incoming>,
    key: &str,
    list: ReferenceList,
    add: bool,
) -> Result<Response<BoxBody>> {
    let mut body = JsonBody::read(req).await?;
    let values: Vec<String> = body.required(list.field())?;

    let subject = format!("{} of {}", list.field(), key);
    let outcome: Outcome = match (list, add) {
        (ReferenceList::Techs, true) => projects.add_technologies(values, key).await,
        (ReferenceList::Techs, false) => projects.remove_technologies(values, key).await,
        (ReferenceList::Images, true) => projects.add_images(values, key).await,
        (ReferenceList::Images, false) => projects.remove_images(values, key).await,
    };

    Ok(change_response(&[outcome], Change::Update, &subject))
}
