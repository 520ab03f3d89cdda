//! Core market domain types.
//!
//! Typed views of exchange state: instruments, tickers, positions,
//! margin, and live orders. These are the validated counterparts of the
//! raw wire payloads — adapters parse into these, the engine never sees
//! raw JSON. All views are rebuilt from the transport every cycle.

use serde::{Deserialize, Serialize};

/// Satoshis per XBT, used to render margin balances.
pub const SATOSHIS_PER_XBT: f64 = 100_000_000.0;

/// Order side — canonical enum used by domain, ports, and adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened on this side.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

/// Settlement convention of a derivatives contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractClass {
    /// Settles in a currency unrelated to both legs.
    Quanto,
    /// Settles in the base currency (e.g. XBTUSD settles in XBT).
    Inverse,
    /// Settles in the quote currency.
    Linear,
}

/// Exchange-defined instrument metadata, refreshed each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange symbol, e.g. "XBTUSD".
    pub symbol: String,
    /// Listing state as reported by the exchange ("Open", "Closed", ...).
    pub state: String,
    /// Minimum price increment.
    pub tick_size: f64,
    /// Decimal places needed to display a price at tick precision.
    pub tick_log: u32,
    /// Contract multiplier (may be negative for inverse contracts).
    pub multiplier: f64,
    /// Quanto contract flag.
    pub is_quanto: bool,
    /// Inverse contract flag.
    pub is_inverse: bool,
    /// Current mark price.
    pub mark_price: f64,
    /// Indicative settlement ("spot") price.
    pub indicative_settle_price: f64,
    /// Order book mid price. Absent when the book is empty.
    pub mid_price: Option<f64>,
    /// Best bid. Absent when the book is empty.
    pub bid_price: Option<f64>,
    /// Best ask. Absent when the book is empty.
    pub ask_price: Option<f64>,
    /// Initial margin requirement as a fraction.
    pub init_margin: f64,
    /// Settlement multiplier against the underlying, when defined.
    pub underlying_to_settle_multiplier: Option<f64>,
    /// Settlement multiplier against the quote currency.
    pub quote_to_settle_multiplier: Option<f64>,
}

impl Instrument {
    /// Whether the instrument is in a state the bot may quote against.
    ///
    /// "Closed" still counts: the exchange reports settled-but-listed
    /// contracts that way and they can reopen within the session.
    pub fn is_quotable_state(&self) -> bool {
        self.state == "Open" || self.state == "Closed"
    }

    /// Settlement convention derived from the exchange flags.
    pub fn contract_class(&self) -> ContractClass {
        if self.is_quanto {
            ContractClass::Quanto
        } else if self.is_inverse {
            ContractClass::Inverse
        } else {
            ContractClass::Linear
        }
    }

    /// Effective contract multiplier in settlement-currency terms.
    pub fn settle_multiplier(&self) -> f64 {
        match self.underlying_to_settle_multiplier {
            Some(underlying) => self.multiplier / underlying,
            None => {
                let quote = self.quote_to_settle_multiplier.unwrap_or(1.0);
                self.multiplier / quote
            }
        }
    }
}

/// Top-of-book prices used to anchor the quote ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ticker {
    /// Best bid.
    pub buy: f64,
    /// Best ask.
    pub sell: f64,
    /// Book mid price.
    pub mid: f64,
}

/// Account margin summary. Balances are in satoshis (XBt).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Margin {
    /// Total margin balance.
    pub margin_balance: f64,
    /// Funds available for new orders.
    pub available_funds: f64,
}

impl Margin {
    /// Margin balance expressed in XBT.
    pub fn balance_xbt(&self) -> f64 {
        self.margin_balance / SATOSHIS_PER_XBT
    }
}

/// Current position on one symbol. Read-only within a cycle; the
/// exchange is the only writer and the view is refetched every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Symbol this position is on.
    pub symbol: String,
    /// Signed quantity in contracts; positive = long.
    pub current_qty: i64,
    /// Average entry price; absent when flat.
    pub avg_entry_price: Option<f64>,
    /// Average cost price; absent when flat.
    pub avg_cost_price: Option<f64>,
    /// Unrealized gross PnL in satoshis.
    pub unrealised_gross_pnl: f64,
    /// Unrealized PnL as a fraction of position value.
    pub unrealised_pnl_pcnt: Option<f64>,
    /// Unrealized return on equity as a fraction.
    pub unrealised_roe_pcnt: Option<f64>,
    /// Forced-close price; absent when flat.
    pub liquidation_price: Option<f64>,
    /// Leverage currently applied by the exchange.
    pub leverage: f64,
    /// Mark price the exchange valued the position at.
    pub mark_price: Option<f64>,
}

impl Position {
    /// A flat position for `symbol`, used when the exchange reports none.
    pub fn flat(symbol: &str, leverage: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            current_qty: 0,
            avg_entry_price: None,
            avg_cost_price: None,
            unrealised_gross_pnl: 0.0,
            unrealised_pnl_pcnt: None,
            unrealised_roe_pcnt: None,
            liquidation_price: None,
            leverage,
            mark_price: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.current_qty == 0
    }

    pub fn is_long(&self) -> bool {
        self.current_qty > 0
    }

    pub fn is_short(&self) -> bool {
        self.current_qty < 0
    }
}

/// A live order resting on the exchange, as returned by the transport.
///
/// Live orders carry no rank of their own; the convergence engine pairs
/// them positionally by (side, distance from touch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned order id.
    pub order_id: String,
    /// Client order id; carries this bot's prefix when the order is ours.
    pub cl_ord_id: Option<String>,
    pub side: OrderSide,
    pub price: f64,
    /// Requested quantity in contracts.
    pub order_qty: i64,
    /// Cumulative filled quantity.
    pub cum_qty: i64,
    /// Remaining unfilled quantity.
    pub leaves_qty: i64,
    /// Exchange order status ("New", "Filled", "Canceled", ...).
    pub ord_status: String,
}

/// Round a price to the nearest multiple of `tick_size`.
pub fn round_to_tick(price: f64, tick_size: f64) -> f64 {
    (price / tick_size).round() * tick_size
}

/// Currency delta of a portfolio, split by valuation price.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaBreakdown {
    /// Delta valued at the indicative settle price.
    pub spot: f64,
    /// Delta valued at the mark price.
    pub mark: f64,
    /// mark − spot.
    pub basis: f64,
}

/// Delta contribution of one holding, by contract class.
pub fn contract_delta(class: ContractClass, qty: f64, multiplier: f64, price: f64) -> f64 {
    match class {
        ContractClass::Quanto => qty * multiplier * price,
        ContractClass::Inverse => (multiplier / price) * qty,
        ContractClass::Linear => multiplier * qty,
    }
}

/// Aggregate currency delta over instrument/position pairs.
pub fn portfolio_delta(holdings: &[(Instrument, Position)]) -> DeltaBreakdown {
    let mut delta = DeltaBreakdown::default();
    for (instrument, position) in holdings {
        let class = instrument.contract_class();
        let mult = instrument.settle_multiplier();
        let qty = position.current_qty as f64;
        delta.spot += contract_delta(class, qty, mult, instrument.indicative_settle_price);
        delta.mark += contract_delta(class, qty, mult, instrument.mark_price);
    }
    delta.basis = delta.mark - delta.spot;
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(is_quanto: bool, is_inverse: bool) -> Instrument {
        Instrument {
            symbol: "XBTUSD".to_string(),
            state: "Open".to_string(),
            tick_size: 0.5,
            tick_log: 1,
            multiplier: -100_000_000.0,
            is_quanto,
            is_inverse,
            mark_price: 50_000.0,
            indicative_settle_price: 49_900.0,
            mid_price: Some(50_000.25),
            bid_price: Some(50_000.0),
            ask_price: Some(50_000.5),
            init_margin: 0.01,
            underlying_to_settle_multiplier: Some(-100_000_000.0),
            quote_to_settle_multiplier: None,
        }
    }

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(50_000.3, 0.5), 50_000.5);
        assert_eq!(round_to_tick(50_000.2, 0.5), 50_000.0);
        assert_eq!(round_to_tick(50_000.25, 0.5), 50_000.5);
        assert_eq!(round_to_tick(1234.0, 1.0), 1234.0);
    }

    #[test]
    fn test_contract_class_from_flags() {
        assert_eq!(instrument(true, false).contract_class(), ContractClass::Quanto);
        assert_eq!(instrument(false, true).contract_class(), ContractClass::Inverse);
        assert_eq!(instrument(false, false).contract_class(), ContractClass::Linear);
    }

    #[test]
    fn test_quotable_state() {
        let mut inst = instrument(false, true);
        assert!(inst.is_quotable_state());
        inst.state = "Closed".to_string();
        assert!(inst.is_quotable_state());
        inst.state = "Unlisted".to_string();
        assert!(!inst.is_quotable_state());
    }

    #[test]
    fn test_inverse_delta_sign_follows_qty() {
        let up = contract_delta(ContractClass::Inverse, 100.0, 1.0, 50_000.0);
        let down = contract_delta(ContractClass::Inverse, -100.0, 1.0, 50_000.0);
        assert!(up > 0.0);
        assert!((up + down).abs() < 1e-12);
    }

    #[test]
    fn test_portfolio_delta_basis() {
        let inst = instrument(false, true);
        let mut pos = Position::flat("XBTUSD", 25.0);
        pos.current_qty = 1_000;
        let delta = portfolio_delta(&[(inst, pos)]);
        assert!((delta.basis - (delta.mark - delta.spot)).abs() < 1e-12);
    }

    #[test]
    fn test_margin_balance_xbt() {
        let margin = Margin {
            margin_balance: 150_000_000.0,
            available_funds: 100_000_000.0,
        };
        assert!((margin.balance_xbt() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_position_flat_helpers() {
        let mut pos = Position::flat("XBTUSD", 25.0);
        assert!(pos.is_flat());
        pos.current_qty = -3;
        assert!(pos.is_short());
        assert!(!pos.is_long());
    }
}
