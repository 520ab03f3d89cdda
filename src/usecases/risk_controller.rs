//! Risk Controller - Post-Convergence Corrections
//!
//! Runs after the convergence engine each cycle:
//! - Leverage normalization (clamp upward drift back to the target)
//! - Trailing take-profit (watermark ratchet, market exit on drawdown)
//! - Signal-gated position entry (optional, off by default)
//!
//! Only the trailing watermark, the armed signal directions, and the
//! entry-quantity floor survive between cycles; everything else is
//! read fresh from the snapshot.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::config::AppConfig;
use crate::domain::risk::{ProfitAction, TrailingProfit};
use crate::domain::signals::SignalState;
use crate::ports::exchange::{Exchange, ExchangeResult};

use super::engine::CycleSnapshot;

/// Directional arming derived from the signal stream.
///
/// The webhook's enables arm a direction directly; a fresh MACD
/// histogram reading arms it as an impulse (positive histogram with
/// RSI under 50 arms longs, the mirror image arms shorts). Each
/// histogram value is acted on once, so a redelivered webhook payload
/// is not a second impulse.
#[derive(Debug, Default, Clone, Copy)]
struct SignalArming {
  long: bool,
  short: bool,
  last_macd_acted: Option<f64>,
}

impl SignalArming {
  fn fold(&mut self, signals: &SignalState) {
    if signals.long_enable {
      self.long = true;
      self.short = false;
    }
    if signals.short_enable {
      self.short = true;
      self.long = false;
    }

    let macd = signals.macd_histogram;
    if macd == 0.0 || self.last_macd_acted == Some(macd) {
      return;
    }
    if macd > 0.0 && signals.rsi < 50.0 {
      debug!(macd, rsi = signals.rsi, "MACD impulse arms long");
      self.long = true;
      self.short = false;
      self.last_macd_acted = Some(macd);
    } else if macd < 0.0 && signals.rsi > 50.0 {
      debug!(macd, rsi = signals.rsi, "MACD impulse arms short");
      self.short = true;
      self.long = false;
      self.last_macd_acted = Some(macd);
    }
  }
}

/// Post-convergence risk corrections.
pub struct RiskController<E: Exchange> {
  /// Exchange port.
  exchange: Arc<E>,
  /// Symbol under management.
  symbol: String,
  /// Configured leverage target.
  leverage: f64,
  /// Trailing take-profit ratchet. Survives across cycles.
  profit: TrailingProfit,
  /// Whether signal-gated entries are active.
  entry_enabled: bool,
  /// Contracts to seed a signalled entry with. Survives across cycles.
  position_start_entry_qty: i64,
  /// Armed directions folded from the per-cycle signal snapshots.
  arming: SignalArming,
}

impl<E: Exchange> RiskController<E> {
  pub fn new(exchange: Arc<E>, config: &AppConfig) -> Self {
    Self {
      exchange,
      symbol: config.exchange.symbol.clone(),
      leverage: config.risk.leverage,
      profit: TrailingProfit::new(config.risk.target_roe),
      entry_enabled: config.signals.entry_enabled,
      position_start_entry_qty: config.risk.position_start_entry_qty,
      arming: SignalArming::default(),
    }
  }

  /// Keep the exchange-side leverage pinned to the configured target.
  ///
  /// Non-flat positions are only ever clamped downward: the exchange
  /// may drift leverage upward on fills, never this bot. A flat
  /// position is renormalized whenever it differs at all.
  #[instrument(skip(self, snapshot))]
  pub async fn verify_leverage(&self, snapshot: &CycleSnapshot) -> ExchangeResult<()> {
    let position = &snapshot.position;

    if position.is_flat() {
      if (position.leverage - self.leverage).abs() > f64::EPSILON {
        info!(
          current = position.leverage,
          target = self.leverage,
          "Renormalizing leverage on flat position"
        );
        self.exchange.set_leverage(&self.symbol, self.leverage).await?;
      }
      return Ok(());
    }

    if position.leverage > self.leverage {
      info!(
        current = position.leverage,
        target = self.leverage,
        "Clamping leverage back to target"
      );
      self.exchange.set_leverage(&self.symbol, self.leverage).await?;
    }

    Ok(())
  }

  /// Trailing take-profit: ratchet the watermark on new ROE highs and
  /// close the position at market on a 10% drawdown from it.
  ///
  /// Returns true when the position was closed.
  #[instrument(skip(self, snapshot))]
  pub async fn verify_profit(&mut self, snapshot: &CycleSnapshot) -> ExchangeResult<bool> {
    let position = &snapshot.position;
    if position.is_flat() {
      return Ok(false);
    }

    let Some(roe) = position.unrealised_roe_pcnt else {
      debug!("Position has no ROE yet, skipping take-profit check");
      return Ok(false);
    };
    let qty = position.current_qty;

    info!(target_roe = self.profit.watermark(), roe, "Take-profit check");

    match self.profit.observe(roe) {
      ProfitAction::Hold => {}
      ProfitAction::Ratchet => {
        info!(watermark = self.profit.watermark(), "Trailing watermark ratcheted");
        return Ok(false);
      }
      ProfitAction::Exit => {
        // Clear the book first so the market close cannot cross our
        // own resting quotes.
        self.exchange.cancel_all_orders().await?;
        info!(
          pnl = position.unrealised_gross_pnl,
          "Closing position at market (drawdown from watermark)"
        );
        self.exchange.close_position(&self.symbol, -qty).await?;
        info!(roe, "ROE realized");
        self.profit.reset();
        return Ok(true);
      }
    }

    if self.profit.is_trailing() {
      info!(watermark = self.profit.watermark(), "Trailing");
    }
    info!(
      pnl = position.unrealised_gross_pnl,
      roe,
      pnl_pcnt = position.unrealised_pnl_pcnt,
      "Unrealized position state"
    );

    Ok(false)
  }

  /// Signal-gated entry management. No-op unless enabled in config.
  ///
  /// When an armed direction agrees with its execution enable, a
  /// losing opposite position is flattened at the touch and an entry
  /// is seeded whenever the position is flat or below half the
  /// configured start quantity.
  #[instrument(skip(self, snapshot))]
  pub async fn manage_entries(&mut self, snapshot: &CycleSnapshot) -> ExchangeResult<()> {
    if !self.entry_enabled {
      return Ok(());
    }

    let signals = &snapshot.signals;
    self.arming.fold(signals);

    let qty = snapshot.position.current_qty;
    let roe = snapshot.position.unrealised_roe_pcnt.unwrap_or(0.0);
    let entry = self.position_start_entry_qty;
    let ticker = &snapshot.ticker;

    if self.arming.long && signals.buy_enable {
      if qty < 0 && roe < 0.0 {
        info!(qty, "Flattening losing short before long entry");
        self.exchange.place_order(&self.symbol, -qty, ticker.buy).await?;
      }
      if qty == 0 || (qty > 0 && qty < entry / 2) {
        info!(entry, price = ticker.buy, "Seeding long entry");
        self.exchange.place_order(&self.symbol, entry, ticker.buy).await?;
      }
      return Ok(());
    }

    if self.arming.short && signals.sell_enable {
      if qty > 0 && roe < 0.0 {
        info!(qty, "Flattening losing long before short entry");
        self.exchange.place_order(&self.symbol, -qty, ticker.sell).await?;
      }
      if qty == 0 || (qty < 0 && qty > -entry / 2) {
        info!(entry, price = ticker.sell, "Seeding short entry");
        self.exchange.place_order(&self.symbol, -entry, ticker.sell).await?;
      }
    }

    Ok(())
  }

  /// Watermark exposed for status logging.
  pub fn profit_watermark(&self) -> f64 {
    self.profit.watermark()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_macd_impulse_arms_long_once() {
    let mut arming = SignalArming::default();
    let signals = SignalState {
      rsi: 40.0,
      macd_histogram: 2.0,
      ..SignalState::default()
    };
    arming.fold(&signals);
    assert!(arming.long);
    assert_eq!(arming.last_macd_acted, Some(2.0));

    // Same histogram delivered again is not a fresh impulse.
    arming.long = false;
    arming.fold(&signals);
    assert!(!arming.long);
  }

  #[test]
  fn test_macd_against_rsi_does_not_arm() {
    let mut arming = SignalArming::default();
    // Positive histogram but overbought RSI: no long impulse.
    let signals = SignalState {
      rsi: 70.0,
      macd_histogram: 2.0,
      ..SignalState::default()
    };
    arming.fold(&signals);
    assert!(!arming.long);
    assert!(!arming.short);
  }

  #[test]
  fn test_webhook_enables_arm_directly() {
    let mut arming = SignalArming::default();
    let signals = SignalState {
      long_enable: true,
      ..SignalState::default()
    };
    arming.fold(&signals);
    assert!(arming.long);
    assert!(!arming.short);

    let flipped = SignalState {
      short_enable: true,
      ..SignalState::default()
    };
    arming.fold(&flipped);
    assert!(arming.short);
    assert!(!arming.long);
  }

  #[test]
  fn test_macd_impulse_overrides_previous_arming() {
    let mut arming = SignalArming::default();
    arming.fold(&SignalState {
      long_enable: true,
      ..SignalState::default()
    });
    assert!(arming.long);

    arming.fold(&SignalState {
      rsi: 60.0,
      macd_histogram: -1.0,
      ..SignalState::default()
    });
    assert!(arming.short);
    assert!(!arming.long);
  }
}
