//! Quoting Engine - Cycle Driver and Shutdown Path
//!
//! Owns the per-cycle control flow: snapshot → sanity → status →
//! build/gate/converge → risk controls → sleep. Cycles are strictly
//! sequential; a cycle fully completes or aborts before the next one
//! starts. The engine also owns the cancel-all shutdown path and
//! reports restart conditions (connection loss, config change) to the
//! supervisor that wraps it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::AppConfig;
use crate::domain::market::{self, Instrument, Margin, Order, Position, Ticker};
use crate::domain::signals::SignalState;
use crate::ports::exchange::{Exchange, ExchangeError};

use super::order_manager::{CycleError, OrderManager};
use super::risk_controller::RiskController;

/// Wait before retrying after an amend raced a fill.
const STALE_ORDER_RETRY: Duration = Duration::from_millis(500);

/// Budget for the best-effort cancel-all during shutdown.
const SHUTDOWN_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Unrecoverable conditions: the engine must stop quoting a market it
/// cannot observe, and a crossed ladder means the snapshot is corrupt.
#[derive(Debug, Error)]
pub enum FatalError {
  #[error("instrument {symbol} is not open (state: {state})")]
  MarketClosed { symbol: String, state: String },
  #[error("orderbook is empty, cannot quote")]
  MarketEmpty,
  #[error("sanity check failed: {0}")]
  SanityViolation(String),
}

/// Why one cycle did not complete.
#[derive(Debug, Error)]
enum CycleFailure {
  /// Abort this cycle; the next one retries from scratch.
  #[error(transparent)]
  Transport(#[from] ExchangeError),
  /// Stop quoting entirely and run the shutdown path.
  #[error(transparent)]
  Fatal(#[from] FatalError),
}

/// Why `Engine::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
  /// Shutdown signal or fatal condition; orders were cancelled.
  Shutdown,
  /// config.toml changed; the supervisor rebuilds the engine.
  ConfigChanged,
  /// The transport reported an unhealthy connection.
  ConnectionLost,
}

/// Everything one cycle reads, captured at cycle start and discarded
/// at cycle end. Position and book state are fetched back-to-back so
/// the convergence pass never compares stale pairs.
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
  pub instrument: Instrument,
  pub ticker: Ticker,
  pub position: Position,
  pub margin: Margin,
  pub open_orders: Vec<Order>,
  pub signals: SignalState,
}

/// The quoting engine: one instance per supervisor generation.
pub struct Engine<E: Exchange> {
  exchange: Arc<E>,
  config: AppConfig,
  order_manager: OrderManager<E>,
  risk: RiskController<E>,
  signals_rx: watch::Receiver<SignalState>,
  metrics: Arc<MetricsRegistry>,
  /// Contracts held when this engine generation started.
  starting_qty: Option<i64>,
}

impl<E: Exchange> Engine<E> {
  pub fn new(
    exchange: Arc<E>,
    config: AppConfig,
    signals_rx: watch::Receiver<SignalState>,
    metrics: Arc<MetricsRegistry>,
  ) -> Self {
    let order_manager = OrderManager::new(Arc::clone(&exchange), &config, Arc::clone(&metrics));
    let risk = RiskController::new(Arc::clone(&exchange), &config);

    Self {
      exchange,
      config,
      order_manager,
      risk,
      signals_rx,
      metrics,
      starting_qty: None,
    }
  }

  /// Run cycles until shutdown, config change, or connection loss.
  ///
  /// Starts by resetting the book: cancel everything resting, then
  /// converge from a clean slate.
  #[instrument(skip_all, fields(symbol = %self.config.exchange.symbol))]
  pub async fn run(
    &mut self,
    shutdown_rx: &mut broadcast::Receiver<()>,
    config_rx: &mut watch::Receiver<AppConfig>,
  ) -> Result<RunExit> {
    info!(
      symbol = %self.config.exchange.symbol,
      dry_run = self.config.bot.dry_run,
      "Engine starting; resetting current position"
    );

    match self.exchange.cancel_all_orders().await {
      Ok(n) => info!(cancelled = n, "Existing orders cancelled on startup"),
      Err(e) => warn!(error = %e, "Startup cancel-all failed; first cycle will reconcile"),
    }

    let loop_interval = Duration::from_millis(self.config.bot.loop_interval_ms);

    loop {
      if !self.exchange.is_connection_healthy().await {
        error!("Market data connection unexpectedly closed, restarting");
        self.metrics.connection_healthy.set(0);
        return Ok(RunExit::ConnectionLost);
      }
      self.metrics.connection_healthy.set(1);

      match self.cycle().await {
        Ok(()) => {
          self.metrics.cycles.inc();
        }
        Err(CycleFailure::Transport(e)) => {
          warn!(error = %e, "Cycle aborted; retrying next interval");
          self.metrics.cycle_failures.with_label_values(&["transport"]).inc();
        }
        Err(CycleFailure::Fatal(e)) => {
          error!(error = %e, "Fatal condition; cancelling all orders and shutting down");
          self.metrics.cycle_failures.with_label_values(&["fatal"]).inc();
          self.shutdown_cancel_all().await;
          return Ok(RunExit::Shutdown);
        }
      }

      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Engine received shutdown signal");
          self.shutdown_cancel_all().await;
          return Ok(RunExit::Shutdown);
        }
        changed = config_rx.changed() => {
          if changed.is_ok() {
            info!("Configuration changed, restarting engine");
            return Ok(RunExit::ConfigChanged);
          }
        }
        _ = tokio::time::sleep(loop_interval) => {}
      }
    }
  }

  /// One full pass: snapshot → sanity → status → converge → risk.
  async fn cycle(&mut self) -> Result<(), CycleFailure> {
    let snapshot = self.fetch_snapshot().await?;
    self.order_manager.sanity_check(&snapshot)?;
    self.log_status(&snapshot).await;

    match self.order_manager.place_orders(&snapshot).await {
      Ok(()) => {}
      Err(CycleError::StaleOrder) => {
        // The live-order snapshot is stale; refetch wholesale and
        // re-run the whole build-and-converge exactly once.
        tokio::time::sleep(STALE_ORDER_RETRY).await;
        let fresh = self.fetch_snapshot().await?;
        self.order_manager.sanity_check(&fresh)?;
        match self.order_manager.place_orders(&fresh).await {
          Ok(()) => {}
          Err(CycleError::StaleOrder) => {
            warn!("Amend target stale twice in a row; abandoning cycle");
            self.metrics.cycle_failures.with_label_values(&["stale"]).inc();
          }
          Err(CycleError::Transport(e)) => return Err(e.into()),
        }
      }
      Err(CycleError::Transport(e)) => return Err(e.into()),
    }

    // Post-convergence corrections. Transport failures here abort the
    // cycle like any other; nothing propagates past the run loop.
    self.risk.verify_leverage(&snapshot).await?;
    self.risk.manage_entries(&snapshot).await?;
    if self.risk.verify_profit(&snapshot).await? {
      info!("Position closed by take-profit; next cycle re-enters from flat");
    }

    Ok(())
  }

  /// Fetch all exchange state for this cycle, plus one signal snapshot.
  ///
  /// The market-open and book-empty checks run here, before anything
  /// downstream can act on an unobservable market.
  async fn fetch_snapshot(&mut self) -> Result<CycleSnapshot, CycleFailure> {
    let symbol = self.config.exchange.symbol.clone();

    let instrument = self.exchange.instrument(&symbol).await?;
    if !instrument.is_quotable_state() {
      return Err(
        FatalError::MarketClosed {
          symbol,
          state: instrument.state.clone(),
        }
        .into(),
      );
    }
    if instrument.mid_price.is_none() {
      return Err(FatalError::MarketEmpty.into());
    }

    let ticker = self.exchange.ticker(&symbol).await?;
    let position = self.exchange.position(&symbol).await?;
    let open_orders = self.exchange.open_orders().await?;
    let margin = self.exchange.margin().await?;
    let signals = *self.signals_rx.borrow();

    if self.starting_qty.is_none() {
      self.starting_qty = Some(position.current_qty);
    }

    Ok(CycleSnapshot {
      instrument,
      ticker,
      position,
      margin,
      open_orders,
      signals,
    })
  }

  /// Log the current market-maker status and update the gauges.
  async fn log_status(&self, snapshot: &CycleSnapshot) {
    let position = &snapshot.position;

    info!(
      balance_xbt = %format!("{:.6}", snapshot.margin.balance_xbt()),
      contracts = position.current_qty,
      "Current balance and position"
    );

    if self.config.risk.check_position_limits {
      info!(
        min = self.config.risk.min_position,
        max = self.config.risk.max_position,
        "Position limits"
      );
    }

    if !position.is_flat() {
      info!(
        avg_cost = position.avg_cost_price,
        avg_entry = position.avg_entry_price,
        "Open position prices"
      );
    }

    if let Some(starting) = self.starting_qty {
      info!(traded = position.current_qty - starting, "Contracts traded this run");
    }

    // Portfolio delta is informational; a failure here must not cost
    // the cycle.
    match self.portfolio_delta().await {
      Ok(delta) => info!(spot_delta_xbt = %format!("{:.4}", delta.spot), "Total contract delta"),
      Err(e) => warn!(error = %e, "Portfolio delta unavailable"),
    }

    self.metrics.position_contracts.set(position.current_qty);
    self.metrics.margin_balance_xbt.set(snapshot.margin.balance_xbt());
    if let Some(roe) = position.unrealised_roe_pcnt {
      self.metrics.unrealised_roe.set(roe);
    }
  }

  /// Currency delta across all configured portfolio contracts.
  async fn portfolio_delta(&self) -> Result<market::DeltaBreakdown, ExchangeError> {
    let mut holdings = Vec::with_capacity(self.config.exchange.contracts.len());
    for symbol in &self.config.exchange.contracts {
      let instrument = self.exchange.instrument(symbol).await?;
      let position = self.exchange.position(symbol).await?;
      holdings.push((instrument, position));
    }
    Ok(market::portfolio_delta(&holdings))
  }

  /// Best-effort cancel-all on the way out, on a bounded timeout.
  ///
  /// Failing to cancel (for instance an auth failure) is logged, not
  /// retried: the process is exiting regardless.
  pub async fn shutdown_cancel_all(&self) {
    info!("Shutting down; all open orders will be cancelled");
    let cancel = self.exchange.cancel_all_orders();
    match tokio::time::timeout(SHUTDOWN_CANCEL_TIMEOUT, cancel).await {
      Ok(Ok(n)) => info!(cancelled = n, "Open orders cancelled"),
      Ok(Err(ExchangeError::Auth(e))) => {
        info!(error = %e, "Was not authenticated; could not cancel orders");
      }
      Ok(Err(e)) => warn!(error = %e, "Unable to cancel orders"),
      Err(_) => warn!("Cancel-all timed out during shutdown"),
    }
  }
}
