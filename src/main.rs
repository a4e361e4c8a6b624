//! WCNexus - REST catalog over a document database

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wcnexus::{
    config::{Args, LogFormat, StoreBackend},
    db::{DocumentBackend, MemoryBackend, MongoClient},
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wcnexus={},info", args.log_level).into());
    match args.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  WCNexus API");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store_backend);
    if args.store_backend == StoreBackend::Mongo {
        info!("MongoDB: {}", args.mongo.redacted_uri());
        info!("Database: {}", args.mongo.data_db);
    }
    info!("======================================");

    let backend: Arc<dyn DocumentBackend> = match args.store_backend {
        StoreBackend::Memory => Arc::new(MemoryBackend::new()),
        StoreBackend::Mongo => {
            match MongoClient::new(&args.mongo.mongo_uri(), &args.mongo.data_db).await {
                Ok(client) => {
                    info!("MongoDB connected successfully");
                    Arc::new(client)
                }
                Err(e) if args.dev_mode => {
                    warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                    Arc::new(MemoryBackend::new())
                }
                Err(e) => {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let state = Arc::new(AppState::new(args, backend).await?);
    server::run(state).await?;

    Ok(())
}
