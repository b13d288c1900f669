//! Order Desk
//!
//! Offline-first order intake for a small restaurant. The server half
//! persists storefront orders (customer upsert, catalog pricing, atomic
//! header + items insert); the client half keeps orders in a durable local
//! queue while the server is unreachable and drains it when connectivity
//! returns.
//!
//! The binary has three modes:
//! - `serve` (default): run the order server
//! - `sync`: drain the local offline queue once and print the outcome
//! - `watch`: keep probing the server and drain the queue on reconnect

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod customers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod orders;
pub mod queue;
pub mod server;
pub mod storage;
pub mod sync;

pub use api::{HttpOrderApi, OrderApi, SubmitError};
pub use client::{ClientError, ClientOptions, OrderClient, SubmitOutcome};
pub use connectivity::{ConnectivityObserver, ConnectivitySignal, HealthProbe};
pub use db::DbState;
pub use error::{AppError, OrderError};
pub use models::{OrderSubmission, SubmitReceipt};
pub use queue::OfflineQueue;
pub use server::{build_router, AppState};
pub use storage::LocalStore;
pub use sync::SyncEngine;

// ============================================================================
// App entry point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".into());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match mode.as_str() {
        "serve" => runtime.block_on(serve()),
        "sync" => runtime.block_on(sync_once()),
        "watch" => runtime.block_on(watch()),
        other => Err(anyhow!(
            "unknown mode {other:?}, expected one of: serve, sync, watch"
        )),
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = config::ServerConfig::from_env()?;
    // Keep the guard alive for the lifetime of the server; dropping it flushes logs.
    let _log_guard = diagnostics::init_tracing(&config.log_dir).map_err(|e| anyhow!(e))?;

    info!("Starting Order Desk server v{}", env!("CARGO_PKG_VERSION"));

    let db_state = Arc::new(db::init(&config.data_dir).map_err(|e| anyhow!(e))?);
    if config.seed_catalog {
        let seeded = catalog::seed_sample_catalog(&db_state).map_err(|e| anyhow!(e))?;
        info!(seeded, "Catalog seed checked");
    }
    if config.staff_token.is_none() {
        warn!("ORDER_DESK_STAFF_TOKEN not set, staff routes are open");
    }

    let state = AppState::new(db_state, config.staff_token.clone());
    let app = build_router(state, config.frontend_url.as_deref());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Order server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Order server stopped");
    Ok(())
}

type HttpClient = OrderClient<HttpOrderApi, HealthProbe>;

/// Build the HTTP-backed client with its health probe.
fn build_client(
    config: &config::ClientConfig,
) -> anyhow::Result<(HttpClient, Arc<HealthProbe>)> {
    let store = Arc::new(LocalStore::open(&config.data_dir).map_err(|e| anyhow!(e))?);
    let api = HttpOrderApi::new(&config.api_url, config.request_timeout).map_err(|e| anyhow!(e))?;
    let probe = Arc::new(HealthProbe::new(api.clone(), config.probe_interval));
    let client = OrderClient::new(Arc::new(api), probe.clone(), store, config.client_options());
    Ok((client, probe))
}

async fn sync_once() -> anyhow::Result<()> {
    let config = config::ClientConfig::from_env()?;
    let _log_guard =
        diagnostics::init_tracing(&config.data_dir.join("logs")).map_err(|e| anyhow!(e))?;

    let (client, probe) = build_client(&config)?;
    probe.probe_once().await;

    let outcome = client.sync_now().await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    info!(
        pending = client.pending_count(),
        success = outcome.success,
        "Sync finished"
    );
    Ok(())
}

async fn watch() -> anyhow::Result<()> {
    let config = config::ClientConfig::from_env()?;
    let _log_guard =
        diagnostics::init_tracing(&config.data_dir.join("logs")).map_err(|e| anyhow!(e))?;

    let (client, probe) = build_client(&config)?;
    info!(
        api_url = %config.api_url,
        pending = client.pending_count(),
        "Watching order server connectivity"
    );

    let cancel = CancellationToken::new();
    probe.probe_once().await;
    let probe_task = probe.clone().spawn(cancel.clone());
    client.start();

    shutdown_signal().await;

    client.stop();
    cancel.cancel();
    if let Err(e) = probe_task.await {
        warn!(error = %e, "Health probe task ended abnormally");
    }
    info!(pending = client.pending_count(), "Watch stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
