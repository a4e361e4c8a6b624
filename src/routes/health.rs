//! Health and readiness endpoints
//!
//! - /health, /healthz - Liveness check, reports the store backend in use
//! - /api - Readiness message kept for existing clients

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::common::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    /// "development" or "production"
    pub mode: &'static str,
    /// Document store in use ("mongo" or "memory")
    pub backend: &'static str,
}

#[derive(Serialize)]
struct ApiMessage {
    ok: bool,
    message: &'static str,
}

/// Liveness check
pub fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        backend: state.backend_kind,
    };
    json_response(StatusCode::OK, &response)
}

/// `GET /api`
pub fn api_check() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &ApiMessage {
            ok: true,
            message: "API works!",
        },
    )
}
