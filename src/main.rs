//! Elohim SCORM Host
//!
//! Serves the SCORM run-time API for launched SCOs and converts uploaded
//! SCORM packages into native course drafts.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! elohim-scorm
//!
//! # Start with custom config
//! elohim-scorm --config /path/to/config.toml
//!
//! # Custom port and storage directory
//! elohim-scorm --http-port 8092 --storage-dir /data/scorm
//!
//! # Keep sessions in memory only
//! elohim-scorm --memory
//! ```
//!
//! ## HTTP API
//!
//! - `GET /health` - Health check
//! - `POST /sessions` - Launch a SCO session
//! - `POST /sessions/{id}/call` - Invoke an RTE API method
//! - `DELETE /sessions/{id}` - Unload a session
//! - `POST /import` - Convert a SCORM package
//! - `GET /debug/stream` - Debug event WebSocket

use clap::Parser;
use elohim_scorm::{Config, DebugBroadcaster, HttpServer, MemoryPersistence, Persistence, RteEngine, SledPersistence};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "elohim-scorm")]
#[command(about = "SCORM run-time host and package importer for Elohim")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "ELOHIM_SCORM_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "ELOHIM_SCORM_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "ELOHIM_SCORM_HTTP_PORT")]
    http_port: Option<u16>,

    /// Keep sessions in memory instead of sled
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("elohim_scorm=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if args.memory {
        config.memory_persistence = true;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        memory = config.memory_persistence,
        "Starting elohim-scorm"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let persistence: Arc<dyn Persistence> = if config.memory_persistence {
        Arc::new(MemoryPersistence::new())
    } else {
        let store = SledPersistence::open(config.sessions_db_path())?;
        info!(
            path = %config.sessions_db_path().display(),
            sessions = store.list_sessions()?.len(),
            "Session store opened"
        );
        Arc::new(store)
    };

    let debug_broadcaster = Arc::new(DebugBroadcaster::new());
    let engine = Arc::new(
        RteEngine::new(persistence, config.pipeline.clone())
            .with_debug_broadcaster(Arc::clone(&debug_broadcaster)),
    );

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(
        HttpServer::new(engine, debug_broadcaster, http_addr)
            .with_max_package_bytes(config.max_package_bytes)
            .with_max_extracted_bytes(config.max_extracted_bytes),
    );

    info!("HTTP API available at http://{}", http_addr);
    info!("Endpoints:");
    info!("  GET    /health              - Health check");
    info!("  POST   /sessions            - Launch a SCO session");
    info!("  POST   /sessions/{{id}}/call  - Invoke an RTE API method");
    info!("  DELETE /sessions/{{id}}       - Unload a session");
    info!("  POST   /import              - Convert a SCORM package");
    info!("  WS     /debug/stream        - Debug event stream");
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    Ok(())
}
