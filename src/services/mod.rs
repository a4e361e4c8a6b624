//! Services layer for WCNexus
//!
//! - **Catalog**: Nexus and Photo, one collection each
//! - **Project**: the two-collection Project entity

pub mod catalog;
pub mod project;

pub use catalog::{CatalogRecord, CatalogService, NexusService, PhotoService};
pub use project::{ProjectService, BASE_FIELDS, SIDE_FIELDS};

use std::sync::Arc;

use crate::db::DocumentBackend;
use crate::types::Result;

/// Every service, built once at startup over one shared backend
#[derive(Clone)]
pub struct Services {
    pub nexus: NexusService,
    pub photo: PhotoService,
    pub project: ProjectService,
}

impl Services {
    pub async fn new(backend: Arc<dyn DocumentBackend>) -> Result<Self> {
        Ok(Self {
            nexus: NexusService::new(Arc::clone(&backend)).await?,
            photo: PhotoService::new(Arc::clone(&backend)).await?,
            project: ProjectService::new(backend).await?,
        })
    }
}
