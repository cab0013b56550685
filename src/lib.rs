pub mod backend;
pub mod cache;
pub mod db;
pub mod event_log;
pub mod fingerprint;
pub mod proxy;
pub mod settings;
pub mod shutdown;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::net::TcpListener;

use backend::BackendSupervisor;
use cache::ResponseCache;
use db::Database;
use event_log::EventLog;
use proxy::{create_router, AppState, HttpBackend};
use settings::{Cli, ProxySettings};
use shutdown::shutdown_signal;

/// Starts the backend, serves the proxy until a shutdown signal arrives, then
/// stops the backend. A backend that never becomes ready is fatal.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = ProxySettings::load(&cli)?;
    utils::logging::init(settings.log_file.as_deref())?;

    let db = Database::new(settings.events_db.clone())
        .with_context(|| format!("Failed to open {}", settings.events_db.display()))?;
    info!("Recording events in {}", db.path().display());
    let events = EventLog::new(db.clone());

    let mut supervisor = BackendSupervisor::new(settings.backend_config());
    info!(
        "Starting backend: {} {}",
        supervisor.config().program,
        supervisor.config().args.join(" ")
    );
    if let Err(err) = supervisor.start().await {
        error!("Backend failed to start: {err}");
        return Err(err).context("backend did not become ready");
    }

    let served = serve(&settings, events, &supervisor).await;
    if let Err(err) = &served {
        error!("Proxy server stopped: {err:#}");
    }

    info!("Stopping backend...");
    match supervisor.stop().await {
        Ok(state) => info!("Backend {state}"),
        Err(err) => warn!("Backend did not stop cleanly: {err}"),
    }

    drop(db);
    served
}

async fn serve(
    settings: &ProxySettings,
    events: EventLog,
    supervisor: &BackendSupervisor,
) -> Result<()> {
    let backend = HttpBackend::new(
        &settings.host,
        settings.backend_port,
        settings.backend_timeout(),
    )?;
    let cache = ResponseCache::new(settings.similarity_threshold);
    info!(
        "Forwarding cache misses to {} (similarity threshold {})",
        backend.endpoint(),
        cache.threshold()
    );
    let state = AppState::new(cache, Arc::new(backend), events);
    let app = create_router(state, settings.max_body_bytes());

    let listener = TcpListener::bind((settings.host.as_str(), settings.proxy_port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind proxy on {}:{}",
                settings.host, settings.proxy_port
            )
        })?;
    info!("Started proxy server on port {}", settings.proxy_port);
    supervisor.mark_running();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("proxy server failed")
}
