//! Service wiring: configuration, telemetry, endpoints, adapters, executors,
//! and the reconciliation loop.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use transferarr_config::{Config, load_config};
use transferarr_core::{DownloadClient, MediaManager};
use transferarr_deluge::DelugeEndpoint;
use transferarr_history::{HistorySink, JsonlHistory, NullSink};
use transferarr_managers::ArrManager;
use transferarr_store::{RecordRegistry, StateStore};
use transferarr_telemetry::{LogFormat, LoggingConfig, init_logging};
use transferarr_transfer::{ConnectionProfile, ExecutorOptions, TransferExecutor};

use crate::cli::Cli;
use crate::error::{AppError, AppResult};
use crate::orchestrator::{NamedEndpoint, TorrentManager};

/// How long executors get to drain in-flight copies on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Parse the CLI, load configuration, wire every service, and run the
/// reconciliation loop until a shutdown signal arrives.
///
/// # Errors
///
/// Returns configuration errors (exit code 1) and unrecoverable state-store
/// errors (exit code 2).
pub async fn run_app() -> AppResult<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).map_err(AppError::config)?;

    init_logging(&LoggingConfig {
        level: &config.log_level,
        format: LogFormat::infer(),
    })
    .map_err(|err| AppError::Telemetry {
        detail: format!("{err:#}"),
    })?;
    info!(config = %cli.config.display(), state_dir = %cli.state_dir.display(), "starting");

    fs::create_dir_all(&cli.state_dir).map_err(|source| AppError::StateDir {
        path: cli.state_dir.clone(),
        source,
    })?;

    let registry = Arc::new(RecordRegistry::open(
        StateStore::new(&cli.state_dir),
        config.tunables.progress_write_interval(),
    ));

    let history = build_history(&cli, &config)?;
    let endpoints = build_endpoints(&config)?;
    probe_endpoints(&endpoints).await;
    let adapters = build_adapters(&config)?;
    let executors = build_executors(&config, &endpoints, &registry, &history);

    let manager = TorrentManager::new(
        endpoints,
        adapters,
        executors,
        Arc::clone(&registry),
        config.tunables.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let result = manager.run(shutdown_rx).await;
    manager.shutdown(SHUTDOWN_DEADLINE).await;
    if let Err(err) = registry.persist_if_dirty() {
        warn!(error = %err, "final state flush failed");
    }
    result
}

fn build_history(cli: &Cli, config: &Config) -> AppResult<Arc<dyn HistorySink>> {
    if !config.history.enabled {
        info!("transfer history disabled");
        return Ok(Arc::new(NullSink));
    }
    let history = JsonlHistory::open(&cli.state_dir, config.tunables.progress_write_interval())
        .map_err(|source| AppError::History { source })?;
    if let Some(days) = config.history.retention_days.filter(|days| *days > 0) {
        match history.prune_older_than(days) {
            Ok(removed) if removed > 0 => info!(removed, days, "history retention applied"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "history retention failed"),
        }
    }
    info!(path = %history.path().display(), "transfer history enabled");
    Ok(Arc::new(history))
}

fn build_endpoints(config: &Config) -> AppResult<Vec<NamedEndpoint>> {
    let mut endpoints = Vec::with_capacity(config.download_clients.len());
    for (name, client_config) in &config.download_clients {
        let client = DelugeEndpoint::new(name, client_config, config.tunables.call_timeout())
            .map_err(|source| AppError::Endpoint {
                name: name.clone(),
                source,
            })?;
        endpoints.push(NamedEndpoint {
            name: name.clone(),
            client: Arc::new(client),
        });
    }
    Ok(endpoints)
}

/// Log reachability of each endpoint at startup without failing it; a dead
/// client is a transient condition the loop retries anyway.
async fn probe_endpoints(endpoints: &[NamedEndpoint]) {
    for endpoint in endpoints {
        match endpoint.client.ensure_connected().await {
            Ok(()) => info!(endpoint = %endpoint.name, "endpoint reachable"),
            Err(err) => warn!(endpoint = %endpoint.name, error = %err, "endpoint unreachable at startup"),
        }
    }
}

fn build_adapters(config: &Config) -> AppResult<Vec<Arc<dyn MediaManager>>> {
    let mut adapters: Vec<Arc<dyn MediaManager>> =
        Vec::with_capacity(config.media_managers.len());
    for manager_config in &config.media_managers {
        let adapter = ArrManager::new(manager_config, config.tunables.call_timeout())
            .map_err(|source| AppError::Adapter { source })?;
        adapters.push(Arc::new(adapter));
    }
    if adapters.is_empty() {
        warn!("no media managers configured; nothing will be tracked");
    }
    Ok(adapters)
}

fn build_executors(
    config: &Config,
    endpoints: &[NamedEndpoint],
    registry: &Arc<RecordRegistry>,
    history: &Arc<dyn HistorySink>,
) -> Vec<TransferExecutor> {
    let mut executors = Vec::with_capacity(config.connections.len());
    for (name, connection) in &config.connections {
        let Some(target) = endpoints
            .iter()
            .find(|endpoint| endpoint.name == connection.to)
        else {
            // Validation guarantees the reference; a missing one here is a
            // programming error, not an operator mistake.
            warn!(connection = %name, to = %connection.to, "connection target missing; skipped");
            continue;
        };
        executors.push(TransferExecutor::spawn(
            ConnectionProfile::from_config(name, connection),
            Arc::clone(&target.client),
            Arc::clone(registry),
            Arc::clone(history),
            ExecutorOptions {
                workers: config.tunables.transfer_workers,
                copy_retry_limit: config.tunables.copy_retry_limit,
            },
        ));
    }
    executors
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable; relying on ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
