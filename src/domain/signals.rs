//! Trading signal state.
//!
//! Process-wide signal values (RSI, MACD histogram, directional
//! enables) written by the external webhook and read by the engine.
//! The webhook is the single writer, publishing through a
//! `tokio::sync::watch` channel; the engine clones exactly one
//! snapshot per cycle, so a mid-cycle update can never tear a cycle's
//! view of the signals.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// A consistent snapshot of the signal fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalState {
    /// Latest RSI value.
    pub rsi: f64,
    /// Latest MACD histogram value.
    pub macd_histogram: f64,
    /// Long entries armed.
    pub long_enable: bool,
    /// Short entries armed.
    pub short_enable: bool,
    /// Buy-side execution permitted.
    pub buy_enable: bool,
    /// Sell-side execution permitted.
    pub sell_enable: bool,
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            rsi: 50.0,
            macd_histogram: 0.0,
            long_enable: false,
            short_enable: false,
            buy_enable: false,
            sell_enable: false,
        }
    }
}

/// Partial update accepted from the webhook; absent fields keep their
/// current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalUpdate {
    pub rsi: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub long_enable: Option<bool>,
    pub short_enable: Option<bool>,
    pub buy_enable: Option<bool>,
    pub sell_enable: Option<bool>,
}

impl SignalState {
    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &SignalUpdate) {
        if let Some(rsi) = update.rsi {
            self.rsi = rsi;
        }
        if let Some(macd) = update.macd_histogram {
            self.macd_histogram = macd;
        }
        if let Some(long) = update.long_enable {
            self.long_enable = long;
        }
        if let Some(short) = update.short_enable {
            self.short_enable = short;
        }
        if let Some(buy) = update.buy_enable {
            self.buy_enable = buy;
        }
        if let Some(sell) = update.sell_enable {
            self.sell_enable = sell;
        }
    }
}

/// Single-writer publication point for signal state.
///
/// The webhook adapter holds the hub; everything else holds receivers.
pub struct SignalHub {
    tx: watch::Sender<SignalState>,
}

impl SignalHub {
    /// Create the hub and the receiver the engine snapshots from.
    pub fn channel() -> (Self, watch::Receiver<SignalState>) {
        let (tx, rx) = watch::channel(SignalState::default());
        (Self { tx }, rx)
    }

    /// Apply an update and return the resulting state.
    pub fn apply(&self, update: &SignalUpdate) -> SignalState {
        self.tx.send_modify(|state| state.apply(update));
        *self.tx.borrow()
    }

    /// Current state, for logging.
    pub fn current(&self) -> SignalState {
        *self.tx.borrow()
    }
}
