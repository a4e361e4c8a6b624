//! HTTP server for WCNexus

pub mod http;

pub use http::{run, serve, AppState};
