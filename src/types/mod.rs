//! Shared types for WCNexus

pub mod error;

pub use error::{NexusError, Result};
