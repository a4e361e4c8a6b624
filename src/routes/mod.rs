//! HTTP routes for WCNexus

pub mod common;
pub mod health;
pub mod project;
pub mod records;

pub use common::{not_found_response, preflight_response, BoxBody};
pub use health::{api_check, health_check, HealthResponse};
pub use project::handle_project_request;
pub use records::{handle_catalog_request, CatalogRoute};
