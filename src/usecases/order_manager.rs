//! Order Manager - Ladder Convergence Engine
//!
//! The centerpiece: computes the desired quote ladder for the cycle,
//! diffs it against the live order set, and emits the minimal
//! amend/create/cancel instruction set. Amendments are preferred over
//! cancel/create pairs; creations are preceded by a leverage
//! normalization call; nothing is ever submitted past the liquidation
//! boundary.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::AppConfig;
use crate::domain::ladder::{self, DesiredOrder, LadderParams, QuoteAnchors, SizeMode};
use crate::domain::market::{Order, OrderSide, Position};
use crate::domain::risk::{self, PositionLimits};
use crate::ports::exchange::{AmendRequest, Exchange, ExchangeError, OrderRequest};

use super::engine::{CycleSnapshot, FatalError};

/// How a convergence attempt ended short of full application.
#[derive(Debug, Error)]
pub enum CycleError {
  /// An amend target filled or cancelled while we were processing; the
  /// live-order snapshot is stale and the cycle must restart from
  /// ladder construction.
  #[error("amend target went stale")]
  StaleOrder,
  /// Any other transport failure; the cycle aborts and the next one
  /// starts from scratch.
  #[error(transparent)]
  Transport(#[from] ExchangeError),
}

/// The instruction set produced by one convergence pass.
#[derive(Debug, Default, Clone)]
pub struct ConvergePlan {
  pub to_amend: Vec<AmendRequest>,
  pub to_create: Vec<OrderRequest>,
  pub to_cancel: Vec<Order>,
}

impl ConvergePlan {
  pub fn is_empty(&self) -> bool {
    self.to_amend.is_empty() && self.to_create.is_empty() && self.to_cancel.is_empty()
  }
}

/// Diff the live order set against the desired ladders.
///
/// Live orders are walked in their exchange-returned order; each pops
/// the next unmatched desired order of the same side, outermost first
/// (the ladders are generated outermost-first for exactly this
/// pairing). The pairing is positional, not price-based.
///
/// A pair is amended only when the desired quantity differs from the
/// live leaves quantity, or the price has drifted by more than
/// `relist_interval` relative to the live price — the hysteresis that
/// keeps micro drift from turning into an amend storm. The amended
/// quantity is cumulative fills plus the desired quantity, so volume
/// already filled stays accounted for.
///
/// Live orders left without a partner are cancelled; desired orders
/// left without a partner are created. Both repairs and creations pass
/// the liquidation gate.
pub fn plan_convergence(
  live_orders: &[Order],
  buy_orders: &[DesiredOrder],
  sell_orders: &[DesiredOrder],
  position: &Position,
  relist_interval: f64,
) -> ConvergePlan {
  let mut plan = ConvergePlan::default();
  let mut buys_matched = 0usize;
  let mut sells_matched = 0usize;

  let qty = position.current_qty;
  let liq = position.liquidation_price;

  for order in live_orders {
    let desired = match order.side {
      OrderSide::Buy => {
        let next = buy_orders.get(buys_matched);
        buys_matched += 1;
        next
      }
      OrderSide::Sell => {
        let next = sell_orders.get(sells_matched);
        sells_matched += 1;
        next
      }
    };

    let Some(desired) = desired else {
      // More live orders on this side than desired: cancel the rest.
      plan.to_cancel.push(order.clone());
      continue;
    };

    let price_moved = (desired.price - order.price).abs() > f64::EPSILON
      && ((desired.price / order.price) - 1.0).abs() > relist_interval;

    if desired.qty != order.leaves_qty || price_moved {
      plan.to_amend.push(AmendRequest {
        order_id: order.order_id.clone(),
        side: order.side,
        price: desired.price,
        order_qty: order.cum_qty + desired.qty,
      });
    }
  }

  for desired in buy_orders.iter().skip(buys_matched) {
    if risk::order_clears_liquidation(desired.side, desired.price, qty, liq) {
      plan.to_create.push(OrderRequest {
        side: desired.side,
        price: desired.price,
        qty: desired.qty,
      });
    }
  }
  for desired in sell_orders.iter().skip(sells_matched) {
    if risk::order_clears_liquidation(desired.side, desired.price, qty, liq) {
      plan.to_create.push(OrderRequest {
        side: desired.side,
        price: desired.price,
        qty: desired.qty,
      });
    }
  }

  // The gate applies to repairs identically: an amendment must not
  // move an order past the liquidation boundary either.
  plan.to_amend.retain(|amend| {
    let clears = risk::order_clears_liquidation(amend.side, amend.price, qty, liq);
    if !clears {
      warn!(
        order_id = %amend.order_id,
        side = %amend.side,
        price = amend.price,
        "Suppressing amendment past liquidation boundary"
      );
    }
    clears
  });

  plan
}

/// Drives ladder construction and convergence against the exchange.
pub struct OrderManager<E: Exchange> {
  /// Exchange port.
  exchange: Arc<E>,
  /// Symbol being quoted.
  symbol: String,
  /// Ladder shape parameters.
  params: LadderParams,
  /// Inventory bounds.
  limits: PositionLimits,
  /// Relative price drift tolerated before an amendment.
  relist_interval: f64,
  /// Leverage applied ahead of creations.
  leverage: f64,
  /// Metrics registry for mutation counters.
  metrics: Arc<MetricsRegistry>,
}

impl<E: Exchange> OrderManager<E> {
  pub fn new(exchange: Arc<E>, config: &AppConfig, metrics: Arc<MetricsRegistry>) -> Self {
    let size_mode = if config.quoting.random_order_size {
      SizeMode::Random {
        min: config.quoting.min_order_size,
        max: config.quoting.max_order_size,
      }
    } else {
      SizeMode::Fixed {
        start: config.quoting.order_start_size,
        step: config.quoting.order_step_size,
      }
    };

    Self {
      exchange,
      symbol: config.exchange.symbol.clone(),
      params: LadderParams {
        order_pairs: config.quoting.order_pairs,
        interval: config.quoting.interval,
        min_spread: config.quoting.min_spread,
        maintain_spreads: config.quoting.maintain_spreads,
        size_mode,
      },
      limits: PositionLimits {
        enabled: config.risk.check_position_limits,
        min: config.risk.min_position,
        max: config.risk.max_position,
      },
      relist_interval: config.quoting.relist_interval,
      leverage: config.risk.leverage,
      metrics,
    }
  }

  /// Anchors for this cycle, derived from the snapshot.
  pub fn anchors(&self, snapshot: &CycleSnapshot) -> QuoteAnchors {
    let own_highest_buy = snapshot
      .open_orders
      .iter()
      .filter(|o| o.side == OrderSide::Buy)
      .map(|o| o.price)
      .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.max(p))));
    let own_lowest_sell = snapshot
      .open_orders
      .iter()
      .filter(|o| o.side == OrderSide::Sell)
      .map(|o| o.price)
      .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.min(p))));

    QuoteAnchors::from_market(
      &snapshot.ticker,
      snapshot.instrument.tick_size,
      own_highest_buy,
      own_lowest_sell,
      &self.params,
    )
  }

  /// Desired buy and sell ladders for this cycle, outermost-first.
  ///
  /// A side whose position limit is exceeded is suppressed entirely
  /// for the cycle.
  pub fn build_desired(
    &self,
    snapshot: &CycleSnapshot,
    anchors: &QuoteAnchors,
  ) -> (Vec<DesiredOrder>, Vec<DesiredOrder>) {
    let qty = snapshot.position.current_qty;
    let tick = snapshot.instrument.tick_size;

    let buys = if self.limits.long_exceeded(qty) {
      info!(qty, max = self.limits.max, "Long position limit exceeded, not quoting buys");
      Vec::new()
    } else {
      ladder::build_side(anchors, &self.params, OrderSide::Buy, tick)
    };

    let sells = if self.limits.short_exceeded(qty) {
      info!(qty, min = self.limits.min, "Short position limit exceeded, not quoting sells");
      Vec::new()
    } else {
      ladder::build_side(anchors, &self.params, OrderSide::Sell, tick)
    };

    (buys, sells)
  }

  /// Pre-mutation sanity checks.
  ///
  /// A computed innermost buy at or through the best ask (or innermost
  /// sell at or through the best bid) means the market snapshot is
  /// corrupt or stale; quoting on it would cross the book. Runs before
  /// any order mutation in the cycle.
  pub fn sanity_check(&self, snapshot: &CycleSnapshot) -> Result<(), FatalError> {
    let anchors = self.anchors(snapshot);
    let tick = snapshot.instrument.tick_size;
    let first_buy = anchors.price_at(OrderSide::Buy, 1, self.params.interval, tick);
    let first_sell = anchors.price_at(OrderSide::Sell, 1, self.params.interval, tick);

    if first_buy >= snapshot.ticker.sell || first_sell <= snapshot.ticker.buy {
      error!(
        start_buy = anchors.buy,
        start_sell = anchors.sell,
        first_buy,
        first_sell,
        best_bid = snapshot.ticker.buy,
        best_ask = snapshot.ticker.sell,
        "Sanity check failed, exchange data is inconsistent"
      );
      return Err(FatalError::SanityViolation(format!(
        "first buy {first_buy} / first sell {first_sell} cross the touch \
         ({} / {})",
        snapshot.ticker.buy, snapshot.ticker.sell
      )));
    }

    let qty = snapshot.position.current_qty;
    if self.limits.long_exceeded(qty) {
      info!(qty, max = self.limits.max, "Long delta limit exceeded");
    }
    if self.limits.short_exceeded(qty) {
      info!(qty, min = self.limits.min, "Short delta limit exceeded");
    }

    Ok(())
  }

  /// Build the ladder for `snapshot` and converge the book onto it.
  #[instrument(skip(self, snapshot), fields(symbol = %self.symbol))]
  pub async fn place_orders(&self, snapshot: &CycleSnapshot) -> Result<(), CycleError> {
    let anchors = self.anchors(snapshot);
    let (buys, sells) = self.build_desired(snapshot, &anchors);
    self.converge(snapshot, &buys, &sells).await
  }

  /// Apply one convergence plan: amendments, then creations (behind a
  /// leverage normalization), then cancellations.
  pub async fn converge(
    &self,
    snapshot: &CycleSnapshot,
    buy_orders: &[DesiredOrder],
    sell_orders: &[DesiredOrder],
  ) -> Result<(), CycleError> {
    let plan = plan_convergence(
      &snapshot.open_orders,
      buy_orders,
      sell_orders,
      &snapshot.position,
      self.relist_interval,
    );

    if plan.is_empty() {
      return Ok(());
    }

    let tick_log = snapshot.instrument.tick_log as usize;

    if !plan.to_amend.is_empty() {
      for amend in plan.to_amend.iter().rev() {
        let reference = snapshot
          .open_orders
          .iter()
          .find(|o| o.order_id == amend.order_id);
        if let Some(live) = reference {
          info!(
            side = %amend.side,
            from_qty = live.leaves_qty,
            from_price = %format!("{:.*}", tick_log, live.price),
            to_qty = amend.order_qty - live.cum_qty,
            to_price = %format!("{:.*}", tick_log, amend.price),
            "Amending order"
          );
        }
      }

      match self.exchange.amend_orders(&plan.to_amend).await {
        Ok(_) => {
          self.metrics.orders_amended.inc_by(plan.to_amend.len() as u64);
        }
        Err(ExchangeError::StaleOrder(detail)) => {
          warn!(detail = %detail, "Amending failed; order data must converge before retrying");
          return Err(CycleError::StaleOrder);
        }
        Err(e) => {
          return Err(CycleError::Transport(e));
        }
      }
    }

    if !plan.to_create.is_empty() {
      info!(count = plan.to_create.len(), "Creating orders");
      for order in plan.to_create.iter().rev() {
        info!(
          side = %order.side,
          qty = order.qty,
          price = %format!("{:.*}", tick_log, order.price),
          "Creating order"
        );
      }

      // New risk is taken at the configured leverage, never at whatever
      // the exchange drifted to.
      self
        .exchange
        .set_leverage(&self.symbol, self.leverage)
        .await?;
      self.exchange.create_orders(&plan.to_create).await?;
      self.metrics.orders_created.inc_by(plan.to_create.len() as u64);
    }

    if !plan.to_cancel.is_empty() {
      info!(count = plan.to_cancel.len(), "Canceling orders");
      for order in plan.to_cancel.iter().rev() {
        info!(
          side = %order.side,
          qty = order.leaves_qty,
          price = %format!("{:.*}", tick_log, order.price),
          "Canceling order"
        );
      }

      let ids: Vec<String> = plan.to_cancel.iter().map(|o| o.order_id.clone()).collect();
      self.exchange.cancel_orders(&ids).await?;
      self.metrics.orders_cancelled.inc_by(plan.to_cancel.len() as u64);
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn live(side: OrderSide, price: f64, qty: i64, cum: i64) -> Order {
    Order {
      order_id: format!("{side}-{price}"),
      cl_ord_id: Some("ladder_test".to_string()),
      side,
      price,
      order_qty: qty,
      cum_qty: cum,
      leaves_qty: qty - cum,
      ord_status: "New".to_string(),
    }
  }

  fn desired(side: OrderSide, price: f64, qty: i64) -> DesiredOrder {
    DesiredOrder { side, price, qty }
  }

  fn flat() -> Position {
    Position::flat("XBTUSD", 25.0)
  }

  #[test]
  fn test_empty_book_creates_both_sides() {
    let buys = vec![desired(OrderSide::Buy, 99.0, 10)];
    let sells = vec![desired(OrderSide::Sell, 101.0, 10)];
    let plan = plan_convergence(&[], &buys, &sells, &flat(), 0.01);

    assert_eq!(plan.to_create.len(), 2);
    assert!(plan.to_amend.is_empty());
    assert!(plan.to_cancel.is_empty());
  }

  #[test]
  fn test_matching_book_is_left_alone() {
    let live_orders = vec![live(OrderSide::Buy, 100.0, 10, 0)];
    let buys = vec![desired(OrderSide::Buy, 100.0, 10)];
    let plan = plan_convergence(&live_orders, &buys, &[], &flat(), 0.01);

    assert!(plan.is_empty());
  }

  #[test]
  fn test_price_drift_beyond_relist_interval_amends() {
    let live_orders = vec![live(OrderSide::Buy, 100.0, 10, 0)];
    let buys = vec![desired(OrderSide::Buy, 103.0, 10)];
    let plan = plan_convergence(&live_orders, &buys, &[], &flat(), 0.01);

    assert_eq!(plan.to_amend.len(), 1);
    assert_eq!(plan.to_amend[0].price, 103.0);
    assert_eq!(plan.to_amend[0].order_qty, 10);
    assert!(plan.to_create.is_empty());
    assert!(plan.to_cancel.is_empty());
  }

  #[test]
  fn test_price_drift_within_relist_interval_holds() {
    let live_orders = vec![live(OrderSide::Buy, 100.0, 10, 0)];
    let buys = vec![desired(OrderSide::Buy, 100.5, 10)];
    let plan = plan_convergence(&live_orders, &buys, &[], &flat(), 0.01);

    assert!(plan.is_empty());
  }

  #[test]
  fn test_quantity_change_amends_preserving_fills() {
    // 4 contracts already filled; amend asks for cum + desired.
    let live_orders = vec![live(OrderSide::Buy, 100.0, 10, 4)];
    let buys = vec![desired(OrderSide::Buy, 100.0, 10)];
    let plan = plan_convergence(&live_orders, &buys, &[], &flat(), 0.01);

    assert_eq!(plan.to_amend.len(), 1);
    assert_eq!(plan.to_amend[0].order_qty, 14);
  }

  #[test]
  fn test_excess_live_orders_are_cancelled() {
    let live_orders = vec![
      live(OrderSide::Buy, 100.0, 10, 0),
      live(OrderSide::Buy, 99.0, 10, 0),
      live(OrderSide::Buy, 98.0, 10, 0),
    ];
    let buys = vec![desired(OrderSide::Buy, 100.0, 10)];
    let plan = plan_convergence(&live_orders, &buys, &[], &flat(), 0.01);

    assert_eq!(plan.to_cancel.len(), 2);
    assert!(plan.to_create.is_empty());
    assert!(plan.to_amend.is_empty());
  }

  #[test]
  fn test_convergence_is_idempotent() {
    let buys = vec![
      desired(OrderSide::Buy, 98.0, 30),
      desired(OrderSide::Buy, 99.0, 20),
      desired(OrderSide::Buy, 100.0, 10),
    ];
    let sells = vec![
      desired(OrderSide::Sell, 104.0, 30),
      desired(OrderSide::Sell, 103.0, 20),
      desired(OrderSide::Sell, 102.0, 10),
    ];

    let first = plan_convergence(&[], &buys, &sells, &flat(), 0.01);
    assert_eq!(first.to_create.len(), 6);

    // Pretend the exchange accepted everything verbatim.
    let live_orders: Vec<Order> = first
      .to_create
      .iter()
      .enumerate()
      .map(|(i, req)| Order {
        order_id: format!("ord-{i}"),
        cl_ord_id: None,
        side: req.side,
        price: req.price,
        order_qty: req.qty,
        cum_qty: 0,
        leaves_qty: req.qty,
        ord_status: "New".to_string(),
      })
      .collect();

    let second = plan_convergence(&live_orders, &buys, &sells, &flat(), 0.01);
    assert!(second.is_empty(), "second pass must emit no mutations: {second:?}");
  }

  #[test]
  fn test_creations_gated_by_liquidation_price() {
    let mut position = flat();
    position.current_qty = 100;
    position.liquidation_price = Some(99.5);

    let buys = vec![
      desired(OrderSide::Buy, 98.0, 10),
      desired(OrderSide::Buy, 100.0, 10),
    ];
    let plan = plan_convergence(&[], &buys, &[], &position, 0.01);

    // Only the buy above liquidation survives.
    assert_eq!(plan.to_create.len(), 1);
    assert_eq!(plan.to_create[0].price, 100.0);
  }

  #[test]
  fn test_amendments_gated_by_liquidation_price() {
    let mut position = flat();
    position.current_qty = 100;
    position.liquidation_price = Some(99.5);

    let live_orders = vec![live(OrderSide::Buy, 100.0, 10, 0)];
    // Desired would drag the order below liquidation.
    let buys = vec![desired(OrderSide::Buy, 97.0, 10)];
    let plan = plan_convergence(&live_orders, &buys, &[], &position, 0.01);

    assert!(plan.to_amend.is_empty());
  }

  #[test]
  fn test_short_position_passes_buy_creations() {
    let mut position = flat();
    position.current_qty = -100;
    position.liquidation_price = Some(110.0);

    let buys = vec![desired(OrderSide::Buy, 98.0, 10)];
    let sells = vec![desired(OrderSide::Sell, 111.0, 10)];
    let plan = plan_convergence(&[], &buys, &sells, &position, 0.01);

    // Buys are free while short; the sell above liquidation is vetoed.
    assert_eq!(plan.to_create.len(), 1);
    assert_eq!(plan.to_create[0].side, OrderSide::Buy);
  }

  #[test]
  fn test_empty_sides_are_valid_inputs() {
    let plan = plan_convergence(&[], &[], &[], &flat(), 0.01);
    assert!(plan.is_empty());

    let live_orders = vec![live(OrderSide::Sell, 101.0, 10, 0)];
    let plan = plan_convergence(&live_orders, &[], &[], &flat(), 0.01);
    assert_eq!(plan.to_cancel.len(), 1);
  }
}
