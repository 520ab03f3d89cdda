//! Risk rules applied around the convergence engine.
//!
//! Three concerns live here as pure logic so they can be exercised
//! without a transport: the liquidation-price gate, the position
//! limits, and the trailing take-profit ratchet. The use-case layer
//! drives them and issues the resulting exchange calls.

use tracing::warn;

use super::ladder::DesiredOrder;
use super::market::OrderSide;

// ── Liquidation gate ────────────────────────────────────────

/// Whether an order at `price` may rest without sitting on the wrong
/// side of the liquidation price.
///
/// Long positions must not bid below liquidation; short positions must
/// not offer above it. Flat positions (or an unknown boundary) pass
/// everything. The same test gates both creations and amendments.
pub fn order_clears_liquidation(
    side: OrderSide,
    price: f64,
    current_qty: i64,
    liquidation_price: Option<f64>,
) -> bool {
    let Some(liq) = liquidation_price else {
        return true;
    };
    match side {
        OrderSide::Buy => current_qty <= 0 || price >= liq,
        OrderSide::Sell => current_qty >= 0 || price <= liq,
    }
}

/// Drop desired orders that would rest past the liquidation boundary.
pub fn filter_liquidation_safe(
    orders: Vec<DesiredOrder>,
    current_qty: i64,
    liquidation_price: Option<f64>,
) -> Vec<DesiredOrder> {
    orders
        .into_iter()
        .filter(|order| {
            let keep =
                order_clears_liquidation(order.side, order.price, current_qty, liquidation_price);
            if !keep {
                warn!(
                    side = %order.side,
                    price = order.price,
                    qty = order.qty,
                    "Dropping order past liquidation boundary"
                );
            }
            keep
        })
        .collect()
}

// ── Position limits ─────────────────────────────────────────

/// Configured min/max inventory bounds, in contracts.
#[derive(Debug, Clone, Copy)]
pub struct PositionLimits {
    pub enabled: bool,
    pub min: i64,
    pub max: i64,
}

impl PositionLimits {
    /// True when the long limit is reached and buys must stop.
    pub fn long_exceeded(&self, current_qty: i64) -> bool {
        self.enabled && current_qty >= self.max
    }

    /// True when the short limit is reached and sells must stop.
    pub fn short_exceeded(&self, current_qty: i64) -> bool {
        self.enabled && current_qty <= self.min
    }
}

// ── Trailing take-profit ────────────────────────────────────

/// What the controller should do after a watermark update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfitAction {
    /// Nothing to do.
    Hold,
    /// Trailing started or the watermark ratcheted upward.
    Ratchet,
    /// Drawdown from the watermark: close the position at market.
    Exit,
}

/// One-directional trailing take-profit ratchet.
///
/// Until trailing starts, `watermark` holds the configured profit
/// target. Once unrealized ROE exceeds it, the ratchet arms and the
/// watermark tracks the best ROE seen; it never moves down. A fall to
/// 90% of the watermark while trailing triggers the exit, after which
/// the ratchet resets to the baseline target.
#[derive(Debug, Clone, Copy)]
pub struct TrailingProfit {
    baseline: f64,
    watermark: f64,
    trailing: bool,
}

/// Fraction of the watermark that must be retained while trailing.
const DRAWDOWN_RETENTION: f64 = 0.9;

impl TrailingProfit {
    pub fn new(target: f64) -> Self {
        Self {
            baseline: target,
            watermark: target,
            trailing: false,
        }
    }

    /// Feed one ROE observation; returns the action to take.
    pub fn observe(&mut self, roe: f64) -> ProfitAction {
        if !self.trailing {
            if roe > self.watermark {
                self.trailing = true;
                self.watermark = roe;
                return ProfitAction::Ratchet;
            }
            return ProfitAction::Hold;
        }

        if roe > self.watermark {
            self.watermark = roe;
            return ProfitAction::Ratchet;
        }

        if roe <= self.watermark * DRAWDOWN_RETENTION {
            return ProfitAction::Exit;
        }

        ProfitAction::Hold
    }

    /// Reset after a realized exit: trailing off, target back to baseline.
    pub fn reset(&mut self) {
        self.trailing = false;
        self.watermark = self.baseline;
    }

    pub fn is_trailing(&self) -> bool {
        self.trailing
    }

    pub fn watermark(&self) -> f64 {
        self.watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(side: OrderSide, price: f64) -> DesiredOrder {
        DesiredOrder {
            side,
            price,
            qty: 100,
        }
    }

    #[test]
    fn test_flat_position_passes_all_orders() {
        assert!(order_clears_liquidation(OrderSide::Buy, 1.0, 0, Some(50_000.0)));
        assert!(order_clears_liquidation(OrderSide::Sell, 1e9, 0, Some(50_000.0)));
    }

    #[test]
    fn test_long_position_blocks_buys_below_liquidation() {
        assert!(!order_clears_liquidation(OrderSide::Buy, 49_000.0, 100, Some(49_500.0)));
        assert!(order_clears_liquidation(OrderSide::Buy, 49_600.0, 100, Some(49_500.0)));
        // Sells are unaffected while long.
        assert!(order_clears_liquidation(OrderSide::Sell, 60_000.0, 100, Some(49_500.0)));
    }

    #[test]
    fn test_short_position_blocks_sells_above_liquidation() {
        assert!(!order_clears_liquidation(OrderSide::Sell, 51_000.0, -100, Some(50_500.0)));
        assert!(order_clears_liquidation(OrderSide::Sell, 50_400.0, -100, Some(50_500.0)));
        assert!(order_clears_liquidation(OrderSide::Buy, 40_000.0, -100, Some(50_500.0)));
    }

    #[test]
    fn test_filter_drops_only_offending_orders() {
        let orders = vec![
            desired(OrderSide::Buy, 49_000.0),
            desired(OrderSide::Buy, 49_800.0),
        ];
        let kept = filter_liquidation_safe(orders, 100, Some(49_500.0));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].price, 49_800.0);
    }

    #[test]
    fn test_position_limits() {
        let limits = PositionLimits {
            enabled: true,
            min: -500,
            max: 500,
        };
        assert!(limits.long_exceeded(500));
        assert!(!limits.long_exceeded(499));
        assert!(limits.short_exceeded(-500));
        assert!(!limits.short_exceeded(-499));

        let disabled = PositionLimits {
            enabled: false,
            ..limits
        };
        assert!(!disabled.long_exceeded(10_000));
        assert!(!disabled.short_exceeded(-10_000));
    }

    #[test]
    fn test_trailing_arms_when_roe_exceeds_target() {
        let mut tp = TrailingProfit::new(0.01);
        assert_eq!(tp.observe(0.005), ProfitAction::Hold);
        assert!(!tp.is_trailing());
        assert_eq!(tp.observe(0.02), ProfitAction::Ratchet);
        assert!(tp.is_trailing());
        assert_eq!(tp.watermark(), 0.02);
    }

    #[test]
    fn test_watermark_only_moves_up() {
        let mut tp = TrailingProfit::new(0.01);
        tp.observe(0.02);
        tp.observe(0.05);
        assert_eq!(tp.watermark(), 0.05);
        // A dip that stays above 90% of the watermark holds it.
        assert_eq!(tp.observe(0.046), ProfitAction::Hold);
        assert_eq!(tp.watermark(), 0.05);
    }

    #[test]
    fn test_exit_at_ninety_percent_drawdown() {
        let mut tp = TrailingProfit::new(0.01);
        tp.observe(0.05);
        assert_eq!(tp.observe(0.045), ProfitAction::Exit);
    }

    #[test]
    fn test_no_exit_while_not_trailing() {
        let mut tp = TrailingProfit::new(0.01);
        assert_eq!(tp.observe(-0.5), ProfitAction::Hold);
        assert_eq!(tp.observe(0.0), ProfitAction::Hold);
        assert!(!tp.is_trailing());
    }

    #[test]
    fn test_reset_returns_to_baseline() {
        let mut tp = TrailingProfit::new(0.01);
        tp.observe(0.08);
        assert_eq!(tp.observe(0.01), ProfitAction::Exit);
        tp.reset();
        assert!(!tp.is_trailing());
        assert_eq!(tp.watermark(), 0.01);
        // Must re-arm from the baseline, not the old watermark.
        assert_eq!(tp.observe(0.005), ProfitAction::Hold);
    }
}
