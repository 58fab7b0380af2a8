//! Segment Splitter
//!
//! An HTTP service that accepts an uploaded audio or video file, cuts its
//! audio track into fixed-duration AAC segments with ffmpeg, and streams the
//! segments back as a single ZIP archive.

mod config;
mod config_file;
mod error;
mod http;
mod pipeline;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, ServerConfig};
use crate::error::{Result, SplitError};
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "segment-splitter";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let first = args.next();

    // `--init-config [path]` writes a default config file and exits
    if first.as_deref() == Some("--init-config") {
        let path = args.next().unwrap_or_else(|| "config.toml".to_string());
        config_file::generate_default_config(&path)
            .map_err(|e| SplitError::Config(format!("cannot write {}: {}", path, e)))?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    // Load configuration
    let config_path = first.unwrap_or_else(|| "config.toml".to_string());
    let (config, load_error) = match config_file::load_server_config(&config_path) {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = ServerConfig::default();
            config.apply_env();
            (config, Some(e))
        }
    };

    init_logging(config.log_format);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }
    config.validate()?;
    tracing::info!("Configuration loaded: {:?}", redacted(&config));

    // Create application state
    let state = Arc::new(AppState::new(config.clone()));

    // A missing ffmpeg only fails requests, not startup
    if state.pipeline.transcoder().probe().await.is_none() {
        tracing::warn!(
            "{} is not usable; split requests will fail until it is installed",
            config.ffmpeg_path.display()
        );
    }
    if config.require_auth_token.is_some() {
        tracing::info!("Bearer token authentication enabled");
    }

    // Build router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| SplitError::Config(format!("invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "segment_splitter=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Configuration with the auth token masked, for logging
fn redacted(config: &ServerConfig) -> ServerConfig {
    let mut config = config.clone();
    if config.require_auth_token.is_some() {
        config.require_auth_token = Some("***".to_string());
    }
    config
}
