//! WCNexus - REST catalog over a document database
//!
//! Serves three entities over HTTP/JSON:
//!
//! - **Nexus**: named, typed catalog records in one collection
//! - **Photo**: image records in one collection
//! - **Project**: a Nexus record plus a side record of technology and image
//!   references, joined on read and written to both collections
//!
//! MongoDB is the production store; an in-memory store backs development
//! and tests.

pub mod config;
pub mod db;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, serve, AppState};
pub use types::{NexusError, Result};
