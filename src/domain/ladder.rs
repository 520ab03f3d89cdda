//! Quote ladder construction.
//!
//! Builds the desired buy/sell quote ladders around the touch: two
//! anchor prices one tick inside the spread (or snapped to our own
//! resting order under maintain-spreads mode), widened when the spread
//! is below the configured minimum, then geometric price steps working
//! outward with per-level sizing.
//!
//! Ladders are emitted outermost-first. The convergence engine pairs
//! live orders against desired orders positionally, so when the inner
//! order fills, matching from the outside in amends the fewest orders
//! and creates exactly one new order at the inside.

use rand::Rng;

use super::market::{OrderSide, Ticker, round_to_tick};

/// Per-level quantity selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMode {
    /// `start + (level - 1) * step` contracts at each level.
    Fixed { start: i64, step: i64 },
    /// Uniform draw in `[min, max]` contracts at each level.
    Random { min: i64, max: i64 },
}

/// Ladder shape parameters, taken from the quoting config.
#[derive(Debug, Clone, Copy)]
pub struct LadderParams {
    /// Number of buy/sell pairs to keep resting.
    pub order_pairs: usize,
    /// Geometric distance between successive levels (0.005 = 0.5%).
    pub interval: f64,
    /// Minimum spread to maintain between the anchors.
    pub min_spread: f64,
    /// Quote just inside the existing spread instead of tightening it.
    pub maintain_spreads: bool,
    /// Per-level sizing rule.
    pub size_mode: SizeMode,
}

/// A quote the engine wants resting on the book. Ephemeral: computed
/// each cycle, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DesiredOrder {
    pub side: OrderSide,
    pub price: f64,
    pub qty: i64,
}

/// The two price anchors the ladder works outward from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteAnchors {
    pub buy: f64,
    pub sell: f64,
    pub mid: f64,
}

impl QuoteAnchors {
    /// Derive anchors from the ticker.
    ///
    /// The starting quotes sit the smallest possible unit inside the
    /// current spread; that keeps the best price without killing a wide
    /// and potentially profitable spread. Under maintain-spreads mode,
    /// if the touch is already one of our own orders the anchor snaps
    /// onto it — otherwise we would keep working our own quote inward
    /// until the sides collide.
    pub fn from_market(
        ticker: &Ticker,
        tick_size: f64,
        own_highest_buy: Option<f64>,
        own_lowest_sell: Option<f64>,
        params: &LadderParams,
    ) -> Self {
        let mut buy = ticker.buy + tick_size;
        let mut sell = ticker.sell - tick_size;

        if params.maintain_spreads {
            if own_highest_buy == Some(ticker.buy) {
                buy = ticker.buy;
            }
            if own_lowest_sell == Some(ticker.sell) {
                sell = ticker.sell;
            }
        }

        // Back off if our spread is too small.
        if buy * (1.0 + params.min_spread) > sell {
            buy *= 1.0 - params.min_spread / 2.0;
            sell *= 1.0 + params.min_spread / 2.0;
        }

        Self {
            buy,
            sell,
            mid: ticker.mid,
        }
    }

    /// Price for `level` (1 = innermost) on `side`, tick-rounded.
    ///
    /// Level 1 sits exactly at the anchor; each further level steps
    /// geometrically outward by the configured interval.
    pub fn price_at(&self, side: OrderSide, level: usize, interval: f64, tick_size: f64) -> f64 {
        let steps = (level - 1) as i32;
        let raw = match side {
            OrderSide::Buy => self.buy * (1.0 + interval).powi(-steps),
            OrderSide::Sell => self.sell * (1.0 + interval).powi(steps),
        };
        round_to_tick(raw, tick_size)
    }
}

/// Quantity for `level` (1 = innermost) under the sizing rule.
fn quantity_at(mode: SizeMode, level: usize) -> i64 {
    match mode {
        SizeMode::Fixed { start, step } => start + (level as i64 - 1) * step,
        SizeMode::Random { min, max } => rand::thread_rng().gen_range(min..=max),
    }
}

/// Build one side of the ladder, outermost level first.
pub fn build_side(
    anchors: &QuoteAnchors,
    params: &LadderParams,
    side: OrderSide,
    tick_size: f64,
) -> Vec<DesiredOrder> {
    (1..=params.order_pairs)
        .rev()
        .map(|level| DesiredOrder {
            side,
            price: anchors.price_at(side, level, params.interval, tick_size),
            qty: quantity_at(params.size_mode, level),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(maintain: bool) -> LadderParams {
        LadderParams {
            order_pairs: 6,
            interval: 0.005,
            min_spread: 0.001,
            maintain_spreads: maintain,
            size_mode: SizeMode::Fixed { start: 100, step: 50 },
        }
    }

    fn ticker() -> Ticker {
        Ticker {
            buy: 50_000.0,
            sell: 50_100.0,
            mid: 50_050.0,
        }
    }

    #[test]
    fn test_anchors_one_tick_inside_spread() {
        let anchors = QuoteAnchors::from_market(&ticker(), 0.5, None, None, &params(false));
        assert_eq!(anchors.buy, 50_000.5);
        assert_eq!(anchors.sell, 50_099.5);
        assert_eq!(anchors.mid, 50_050.0);
    }

    #[test]
    fn test_maintain_spreads_snaps_to_own_touch() {
        let p = params(true);
        let anchors =
            QuoteAnchors::from_market(&ticker(), 0.5, Some(50_000.0), Some(50_100.0), &p);
        assert_eq!(anchors.buy, 50_000.0);
        assert_eq!(anchors.sell, 50_100.0);

        // A foreign order at the touch does not snap.
        let anchors =
            QuoteAnchors::from_market(&ticker(), 0.5, Some(49_990.0), None, &p);
        assert_eq!(anchors.buy, 50_000.5);
    }

    #[test]
    fn test_tight_spread_backs_off_symmetrically() {
        let tight = Ticker {
            buy: 50_000.0,
            sell: 50_001.0,
            mid: 50_000.5,
        };
        let mut p = params(false);
        p.min_spread = 0.002;
        let anchors = QuoteAnchors::from_market(&tight, 0.5, None, None, &p);
        assert!(anchors.buy * (1.0 + p.min_spread) <= anchors.sell);
        assert!(anchors.buy < 50_000.5);
        assert!(anchors.sell > 50_000.5);
    }

    #[test]
    fn test_level_one_sits_at_anchor() {
        let anchors = QuoteAnchors::from_market(&ticker(), 0.5, None, None, &params(false));
        assert_eq!(anchors.price_at(OrderSide::Buy, 1, 0.005, 0.5), 50_000.5);
        assert_eq!(anchors.price_at(OrderSide::Sell, 1, 0.005, 0.5), 50_099.5);
    }

    #[test]
    fn test_ladder_monotonic_outward() {
        let p = params(false);
        let anchors = QuoteAnchors::from_market(&ticker(), 0.5, None, None, &p);
        let buys = build_side(&anchors, &p, OrderSide::Buy, 0.5);
        let sells = build_side(&anchors, &p, OrderSide::Sell, 0.5);
        assert_eq!(buys.len(), 6);
        assert_eq!(sells.len(), 6);

        // Outermost-first: buys strictly increasing, sells strictly decreasing.
        for pair in buys.windows(2) {
            assert!(pair[0].price < pair[1].price);
        }
        for pair in sells.windows(2) {
            assert!(pair[0].price > pair[1].price);
        }

        // Innermost buy below innermost sell.
        assert!(buys.last().unwrap().price < sells.last().unwrap().price);
    }

    #[test]
    fn test_fixed_sizing_steps_outward() {
        let p = params(false);
        let anchors = QuoteAnchors::from_market(&ticker(), 0.5, None, None, &p);
        let buys = build_side(&anchors, &p, OrderSide::Buy, 0.5);
        // Outermost level 6 carries start + 5*step.
        assert_eq!(buys.first().unwrap().qty, 350);
        assert_eq!(buys.last().unwrap().qty, 100);
    }

    #[test]
    fn test_random_sizing_stays_in_bounds() {
        let mut p = params(false);
        p.size_mode = SizeMode::Random { min: 10, max: 20 };
        let anchors = QuoteAnchors::from_market(&ticker(), 0.5, None, None, &p);
        for _ in 0..32 {
            for order in build_side(&anchors, &p, OrderSide::Sell, 0.5) {
                assert!((10..=20).contains(&order.qty));
            }
        }
    }

    #[test]
    fn test_prices_are_tick_aligned() {
        let p = params(false);
        let anchors = QuoteAnchors::from_market(&ticker(), 0.5, None, None, &p);
        for order in build_side(&anchors, &p, OrderSide::Sell, 0.5) {
            let ticks = order.price / 0.5;
            assert!((ticks - ticks.round()).abs() < 1e-9);
        }
    }
}
