//! Prometheus Metrics Registry - Quoting Observability
//!
//! Registers and exposes Prometheus metrics for dashboards: cycle
//! throughput, order mutation counts, position and margin gauges,
//! and connection health.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Centralized Prometheus metrics for the market maker.
///
/// All metrics follow the naming convention `ladder_bot_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Completed quoting cycles.
    pub cycles: IntCounter,
    /// Cycles that did not complete, by reason.
    pub cycle_failures: IntCounterVec,
    /// Orders created by the convergence engine.
    pub orders_created: IntCounter,
    /// Orders amended in place.
    pub orders_amended: IntCounter,
    /// Orders cancelled as unmatched.
    pub orders_cancelled: IntCounter,
    /// Current signed position in contracts.
    pub position_contracts: IntGauge,
    /// Current margin balance in XBT.
    pub margin_balance_xbt: Gauge,
    /// Latest unrealized ROE observation.
    pub unrealised_roe: Gauge,
    /// Transport connection health (1 = healthy).
    pub connection_healthy: IntGauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cycles = IntCounter::with_opts(Opts::new(
            "ladder_bot_cycles_total",
            "Completed quoting cycles",
        ))?;

        let cycle_failures = IntCounterVec::new(
            Opts::new("ladder_bot_cycle_failures_total", "Cycles aborted, by reason"),
            &["reason"],
        )?;

        let orders_created = IntCounter::with_opts(Opts::new(
            "ladder_bot_orders_created_total",
            "Orders created by convergence",
        ))?;

        let orders_amended = IntCounter::with_opts(Opts::new(
            "ladder_bot_orders_amended_total",
            "Orders amended in place",
        ))?;

        let orders_cancelled = IntCounter::with_opts(Opts::new(
            "ladder_bot_orders_cancelled_total",
            "Orders cancelled as unmatched",
        ))?;

        let position_contracts = IntGauge::with_opts(Opts::new(
            "ladder_bot_position_contracts",
            "Current signed position in contracts",
        ))?;

        let margin_balance_xbt = Gauge::with_opts(Opts::new(
            "ladder_bot_margin_balance_xbt",
            "Current margin balance in XBT",
        ))?;

        let unrealised_roe = Gauge::with_opts(Opts::new(
            "ladder_bot_unrealised_roe",
            "Latest unrealized ROE observation",
        ))?;

        let connection_healthy = IntGauge::with_opts(Opts::new(
            "ladder_bot_connection_healthy",
            "Transport connection health (1=healthy, 0=down)",
        ))?;

        // Register all metrics
        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(cycle_failures.clone()))?;
        registry.register(Box::new(orders_created.clone()))?;
        registry.register(Box::new(orders_amended.clone()))?;
        registry.register(Box::new(orders_cancelled.clone()))?;
        registry.register(Box::new(position_contracts.clone()))?;
        registry.register(Box::new(margin_balance_xbt.clone()))?;
        registry.register(Box::new(unrealised_roe.clone()))?;
        registry.register(Box::new(connection_healthy.clone()))?;

        Ok(Self {
            registry,
            cycles,
            cycle_failures,
            orders_created,
            orders_amended,
            orders_cancelled,
            position_contracts,
            margin_balance_xbt,
            unrealised_roe,
            connection_healthy,
        })
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let registry = metrics_self.registry.clone();
                async move {
                    let encoder = TextEncoder::new();
                    let metric_families = registry.gather();
                    let mut buffer = Vec::new();
                    encoder.encode(&metric_families, &mut buffer).unwrap();
                    String::from_utf8(buffer).unwrap_or_default()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builds_and_counts() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.cycles.inc();
        metrics.orders_created.inc_by(6);
        metrics.cycle_failures.with_label_values(&["transport"]).inc();
        assert_eq!(metrics.cycles.get(), 1);
        assert_eq!(metrics.orders_created.get(), 6);
    }
}
