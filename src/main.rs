//! Drive relay server binary.
//!
//! Serves a small upload page, walks the operator through Google's OAuth
//! consent flow, and forwards multipart uploads to Google Drive once a
//! credential is on file. Uploads are staged on local disk only for the
//! lifetime of the request.

mod atomic;
mod auth;
mod background;
mod config;
mod credential;
mod drive;
mod error;
mod http;
mod logging;
mod oauth;
mod state;
#[cfg(test)]
mod testing;
mod upload;

use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::error::StartupError;
use crate::state::AppState;
use crate::upload::sweep_staging_dir;

/// Starts the relay and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), StartupError> {
    logging::init_logging();

    let args = Args::parse();
    let state = AppState::initialize(&args).await?;

    match sweep_staging_dir(&state.upload.staging_dir, Duration::ZERO).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "removed staged files left by a previous run"),
        Err(err) => warn!(error = %err, "startup staging sweep failed"),
    }

    let app = http::build_router(&state);

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| StartupError::InvalidHost(format!("{}: {err}", args.host)))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        max_upload_size = state.upload.max_bytes,
        staging_dir = ?state.upload.staging_dir,
        "🚀 Starting HTTP server at {}",
        addr
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(state.upload.clone());
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
