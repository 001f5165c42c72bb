//! media-svc - local media-acquisition service.
//!
//! Wraps an external extractor (yt-dlp-compatible) and muxer (ffmpeg-compatible)
//! binary behind a small REST/SSE API: probe, queue a download, track progress,
//! and retrieve the finished file.

use std::sync::Arc;

use media_svc::api::{ApiServer, server::AppState};
use media_svc::config::ServiceConfig;
use media_svc::logging::init_logging;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let (logging_config, _guard) = init_logging(&log_dir)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    media_svc::panic_hook::install(logging_config.log_dir());

    info!("starting media-svc v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(ServiceConfig::from_env_or_default());
    let state = AppState::new(config);
    let server = Arc::new(ApiServer::new(state));

    logging_config.start_retention_cleanup(server.cancel_token());

    info!("media-svc started successfully");

    let server_for_run = server.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server_for_run.run().await {
            tracing::error!(error = %e, "API server exited with error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT (Ctrl+C), initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, initiating shutdown...");
        }
    }

    server.shutdown();
    let _ = server_handle.await;

    info!("media-svc shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal (Unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

/// Wait for SIGTERM signal (Windows - uses ctrl_c as fallback).
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
