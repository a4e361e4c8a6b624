//! HTTP server implementation
//!
//! hyper http1 over TokioIo, one task per connection.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::db::schemas::{Nexus, Photo};
use crate::db::DocumentBackend;
use crate::routes::{self, BoxBody};
use crate::services::Services;
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub services: Services,
    /// Document store in use ("mongo" or "memory")
    pub backend_kind: &'static str,
    pub started_at: Instant,
}

impl AppState {
    /// Build every service over `backend`, ensuring indexes on the way
    pub async fn new(args: Args, backend: Arc<dyn DocumentBackend>) -> Result<Self> {
        let backend_kind = backend.kind();
        let services = Services::new(backend).await?;

        Ok(Self {
            args,
            services,
            backend_kind,
            started_at: Instant::now(),
        })
    }
}

/// Bind the configured address and serve until the process exits
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "WCNexus listening on {} ({} store)",
        state.args.listen, state.backend_kind
    );

    if state.args.dev_mode {
        warn!("Development mode enabled");
    }

    serve(listener, state).await
}

/// Accept loop over an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(routes::preflight_response());
    }

    let response = match (method, path.trim_end_matches('/')) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(state),
        (Method::GET, "/api") => routes::api_check(),
        (_, p) if p.starts_with("/api/") => {
            let segments = path_segments(&p["/api/".len()..]);
            match segments.split_first() {
                Some((entity, rest)) => {
                    let rest = rest.to_vec();
                    match entity.to_ascii_lowercase().as_str() {
                        "project" => routes::handle_project_request(state, req, &rest).await,
                        "photo" => routes::handle_catalog_request::<Photo>(state, req, &rest).await,
                        "nexus" => routes::handle_catalog_request::<Nexus>(state, req, &rest).await,
                        _ => routes::not_found_response(&path),
                    }
                }
                None => routes::not_found_response(&path),
            }
        }
        _ => routes::not_found_response(&path),
    };

    Ok(response)
}

/// Percent-decoded, non-empty path segments
fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect()
}
