//! BitMEX Ladder Bot — Entry Point
//!
//! Initializes configuration, logging, the exchange transport, and the
//! quoting supervisor. Runs until SIGINT/SIGTERM.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Load exchange auth from env vars (BITMEX_API_KEY, BITMEX_API_SECRET)
//! 4. Spawn health/metrics servers (/live, /ready, /metrics)
//! 5. Spawn signal webhook (POST /signals → signal hub)
//! 6. Spawn supervisor: build transport + engine, run cycles, rebuild
//!    on config change or connection loss
//! 7. Wait for SIGINT/SIGTERM → graceful shutdown (cancel-all → exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

mod adapters;
mod config;
mod domain;
mod ports;
mod usecases;

use adapters::api::{BitmexAuth, BitmexExchange, RestClient, RestClientConfig};
use adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use adapters::webhook::SignalServer;
use config::AppConfig;
use config::hot_reload::ConfigWatcher;
use domain::signals::{SignalHub, SignalState};
use usecases::engine::{Engine, RunExit};

/// Pause before rebuilding the engine after a lost connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config = config::loader::load_config("config.toml")
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.bot.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.bot.name,
        version = env!("CARGO_PKG_VERSION"),
        symbol = %config.exchange.symbol,
        dry_run = config.bot.dry_run,
        "Starting ladder market maker"
    );
    if config.bot.dry_run {
        info!("Dry run: orders below represent what would be sent to the exchange");
    }

    // ── 3. Shutdown channel and shared state ────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let (signal_hub, signals_rx) = SignalHub::channel();
    let signal_hub = Arc::new(signal_hub);
    let metrics = Arc::new(MetricsRegistry::new()?);
    let health = Arc::new(HealthState::new());

    // ── 4. Spawn health server ──────────────────────────────
    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_handle = tokio::spawn(health_server.run(shutdown_tx.subscribe()));

    // ── 5. Spawn Prometheus metrics server ──────────────────
    if config.metrics.enabled {
        let serve = Arc::clone(&metrics)
            .serve(config.metrics.bind_address.clone(), shutdown_tx.subscribe());
        tokio::spawn(async move {
            if let Err(e) = serve.await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    // ── 6. Spawn signal webhook ─────────────────────────────
    let webhook = SignalServer::new(Arc::clone(&signal_hub), config.signals.webhook_port);
    let webhook_handle = tokio::spawn({
        let shutdown_rx = shutdown_tx.subscribe();
        async move {
            if let Err(e) = webhook.run(shutdown_rx).await {
                error!(error = %e, "Signal webhook failed");
            }
        }
    });

    // ── 7. Spawn the quoting supervisor ─────────────────────
    let mut supervisor_handle = tokio::spawn(run_supervisor(
        "config.toml".to_string(),
        config,
        signals_rx,
        Arc::clone(&metrics),
        Arc::clone(&health),
        shutdown_tx.clone(),
    ));

    // ── 8. Wait for SIGINT/SIGTERM or supervisor exit ───────
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT received, initiating graceful shutdown");
        }
        _ = terminate_signal() => {
            info!("SIGTERM received, initiating graceful shutdown");
        }
        result = &mut supervisor_handle => {
            // Fatal sanity failures land here: the engine already ran
            // its cancel-all path before the supervisor returned.
            match result {
                Ok(Ok(())) => info!("Supervisor exited"),
                Ok(Err(e)) => error!(error = %e, "Supervisor failed"),
                Err(e) => error!(error = %e, "Supervisor task panicked"),
            }
            health.engine_running.store(false, Ordering::Relaxed);
            let _ = shutdown_tx.send(());
            health_handle.abort();
            webhook_handle.abort();
            info!("Shutdown complete");
            return Ok(());
        }
    }

    // ── Graceful shutdown: signal tasks, let the engine cancel ──
    health.engine_running.store(false, Ordering::Relaxed);
    let _ = shutdown_tx.send(());

    // The engine cancels all open orders on its way out; give it a
    // bounded window to finish.
    match tokio::time::timeout(Duration::from_secs(30), supervisor_handle).await {
        Ok(Ok(Ok(()))) => info!("Engine shut down cleanly"),
        Ok(Ok(Err(e))) => warn!(error = %e, "Engine shutdown returned an error"),
        Ok(Err(e)) => warn!(error = %e, "Supervisor task panicked during shutdown"),
        Err(_) => warn!("Engine shutdown timed out"),
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), webhook_handle).await;
    health_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Run engines until shutdown, rebuilding on restart conditions.
///
/// Each generation gets a fresh transport and a fresh engine. A config
/// change rebuilds with the new parameters; a lost connection rebuilds
/// after a short delay; shutdown (signal or fatal sanity failure)
/// returns after the engine's cancel-all path has run.
async fn run_supervisor(
    config_path: String,
    initial_config: AppConfig,
    signals_rx: watch::Receiver<SignalState>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let mut config = initial_config;

    loop {
        // Fresh transport for this generation.
        let auth = Arc::new(
            BitmexAuth::from_env().context("Failed to load exchange credentials from env")?,
        );
        let rest_config = RestClientConfig {
            base_url: config.exchange.base_url.clone(),
            timeout: Duration::from_millis(config.exchange.timeout_ms),
            requests_per_minute: config.exchange.requests_per_minute,
            ..RestClientConfig::default()
        };
        let client = RestClient::new(Arc::clone(&auth), rest_config)
            .context("Failed to create REST client")?;
        let exchange = Arc::new(BitmexExchange::new(client, &config));

        // Watch config.toml for this generation.
        let (mut watcher, mut config_rx) = ConfigWatcher::new(&config_path, config.clone());
        let watcher_shutdown = shutdown_tx.subscribe();
        let watcher_handle = tokio::spawn(async move {
            if let Err(e) = watcher.run(watcher_shutdown).await {
                warn!(error = %e, "Config watcher failed");
            }
        });

        let mut engine = Engine::new(
            exchange,
            config.clone(),
            signals_rx.clone(),
            Arc::clone(&metrics),
        );
        let mut shutdown_rx = shutdown_tx.subscribe();
        let exit = engine.run(&mut shutdown_rx, &mut config_rx).await?;
        watcher_handle.abort();

        match exit {
            RunExit::Shutdown => return Ok(()),
            RunExit::ConfigChanged => {
                config = config_rx.borrow().clone();
                info!("Restarting the market maker with updated configuration");
            }
            RunExit::ConnectionLost => {
                health.transport_healthy.store(false, Ordering::Relaxed);
                warn!(
                    delay_secs = RECONNECT_DELAY.as_secs(),
                    "Restarting the market maker after connection loss"
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
                health.transport_healthy.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// Resolve when SIGTERM is delivered (never resolves off-unix).
async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        } else {
            std::future::pending::<()>().await;
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}
