//! Request parsing and response helpers shared by the entity routes

use bson::{Bson, Document};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

use crate::db::{Outcome, OutcomeSet, UpdateToken, ViewOption};
use crate::types::{NexusError, Result};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest request body accepted, in bytes
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// =============================================================================
// Response Helpers
// =============================================================================

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

pub fn preflight_response() -> Response<BoxBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
    );
    response
}

pub fn not_found_response(path: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "ok": false,
            "message": format!("No route for {}", path),
        }),
    )
}

/// `{ok: false, message}` with the status the error maps to
pub fn error_response(err: NexusError) -> Response<BoxBody> {
    let status = err.status_code();
    let message = match err {
        NexusError::BadRequest(m) | NexusError::NotFound(m) => m,
        other => other.to_string(),
    };
    json_response(status, &Outcome::failure(message))
}

/// 200 with the smallest per-collection count, or 500 if any collection failed
pub fn add_response(outcomes: &[Outcome], subject: &str) -> Response<BoxBody> {
    if outcomes.all_ok() {
        return json_response(
            StatusCode::OK,
            &Outcome {
                ok: true,
                num_affected: outcomes.min_affected(),
                message: format!("Successfully added {}.", subject),
            },
        );
    }

    for message in outcomes.failure_messages() {
        error!("Adding {} failed: {}", subject, message);
    }
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &Outcome::failure(format!("Failed to add {}.", subject)),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Update,
    Delete,
}

impl Change {
    fn verb(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// 200 with the largest per-collection count, 404 when nothing was touched,
/// 500 if any collection failed
pub fn change_response(outcomes: &[Outcome], change: Change, subject: &str) -> Response<BoxBody> {
    if !outcomes.all_ok() {
        for message in outcomes.failure_messages() {
            error!("Trying to {} {} failed: {}", change.verb(), subject, message);
        }
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &Outcome::failure(format!("Failed to {} {}.", change.verb(), subject)),
        );
    }

    let count = outcomes.max_affected();
    if count == 0 {
        return json_response(
            StatusCode::NOT_FOUND,
            &Outcome::failure(format!(
                "Unable to find {} to {}.",
                subject,
                change.verb()
            )),
        );
    }

    json_response(
        StatusCode::OK,
        &Outcome {
            ok: true,
            num_affected: count,
            message: format!("Successfully {}d {}.", change.verb(), subject),
        },
    )
}

// =============================================================================
// Query String
// =============================================================================

/// `?condition=<json>&options=<json>`
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default, alias = "Condition")]
    pub condition: Option<String>,
    #[serde(default, alias = "Options")]
    pub options: Option<String>,
}

impl ListQuery {
    pub fn from_request<B>(req: &Request<B>) -> Result<Self> {
        serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
            .map_err(|e| NexusError::BadRequest(format!("Invalid query string: {}", e)))
    }

    /// Parsed view options; `None` when the parameter is absent
    pub fn view(&self) -> Result<Option<ViewOption>> {
        let Some(raw) = self.options.as_deref() else {
            return Ok(None);
        };
        let invalid = || NexusError::BadRequest("\"options\" query parameter is invalid.".to_string());

        let view: ViewOption = serde_json::from_str(raw).map_err(|_| invalid())?;
        view.validate().map_err(|_| invalid())?;
        Ok(Some(view))
    }

    /// Parsed filter; an absent parameter matches everything
    pub fn condition(&self) -> Result<Document> {
        let Some(raw) = self.condition.as_deref() else {
            return Ok(Document::new());
        };
        let invalid =
            || NexusError::BadRequest("\"condition\" query parameter is invalid.".to_string());

        let value: Value = serde_json::from_str(raw).map_err(|_| invalid())?;
        json_to_document(value).ok_or_else(invalid)
    }
}

// =============================================================================
// Request Body
// =============================================================================

/// JSON object body with case-insensitive field access
#[derive(Debug, Default)]
pub struct JsonBody(Map<String, Value>);

impl JsonBody {
    /// Buffer and parse a request body, refusing more than `MAX_BODY_BYTES`
    pub async fn read<B>(req: Request<B>) -> Result<Self>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let bytes = Limited::new(req.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    NexusError::BadRequest("Request body too large".to_string())
                } else {
                    NexusError::BadRequest(format!("Failed to read body: {}", e))
                }
            })?
            .to_bytes();

        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        match serde_json::from_slice(bytes)? {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(NexusError::BadRequest(
                "Request body must be a JSON object".to_string(),
            )),
        }
    }

    /// Remove a field, matching its name case-insensitively; `null` counts as absent
    pub fn take(&mut self, name: &str) -> Option<Value> {
        let key = self
            .0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()?;
        match self.0.remove(&key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    pub fn optional<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>> {
        self.take(name)
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    NexusError::BadRequest(format!("\"{}\" field is invalid: {}", name, e))
                })
            })
            .transpose()
    }

    pub fn required<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        self.optional(name)?.ok_or_else(|| {
            NexusError::BadRequest(format!("\"{}\" field cannot be empty.", name))
        })
    }

    /// A required filter document that must not be empty
    ///
    /// `action` names the operation in the rejection, e.g. "updating".
    pub fn condition(&mut self, action: &str) -> Result<Document> {
        let value: Value = self.required("condition")?;
        let condition = json_to_document(value).ok_or_else(|| {
            NexusError::BadRequest("\"condition\" field must be a JSON object.".to_string())
        })?;
        if condition.is_empty() {
            return Err(NexusError::BadRequest(format!(
                "Unconditional {} is not allowed.",
                action
            )));
        }
        Ok(condition)
    }

    pub fn token(&mut self) -> Result<UpdateToken> {
        let value: Value = self.required("token")?;
        let token = json_to_document(value).ok_or_else(|| {
            NexusError::BadRequest("\"token\" field must be a JSON object.".to_string())
        })?;
        if token.is_empty() {
            return Err(NexusError::BadRequest(
                "The update token is missing.".to_string(),
            ));
        }
        UpdateToken::parse(token)
    }
}

/// Convert a JSON object (extended JSON allowed, e.g. `{"$oid": ...}`) to BSON
pub fn json_to_document(value: Value) -> Option<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Some(doc),
        _ => None,
    }
}
