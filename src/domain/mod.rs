//! Domain layer - Core business logic and models.
//!
//! Pure quoting and risk logic for the ladder market maker. No
//! transport dependencies here (hexagonal architecture inner ring);
//! everything is testable in isolation.

pub mod ladder;
pub mod market;
pub mod risk;
pub mod signals;

// Re-export core types for convenience
pub use ladder::{DesiredOrder, LadderParams, QuoteAnchors, SizeMode};
pub use market::{
    ContractClass, Instrument, Margin, Order, OrderSide, Position, Ticker,
};
pub use risk::{PositionLimits, ProfitAction, TrailingProfit};
pub use signals::{SignalHub, SignalState, SignalUpdate};
