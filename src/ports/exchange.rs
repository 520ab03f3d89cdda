//! Exchange Port - Derivatives Exchange Capability Set
//!
//! Defines the trait the engine requires from the exchange transport:
//! market/position/order reads plus the order mutation and leverage
//! calls. The adapter owns signing, rate limiting, and retries; the
//! engine only sees typed views and the error taxonomy below.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::market::{Instrument, Margin, Order, OrderSide, Position, Ticker};

/// Transport-level failures surfaced to the engine.
///
/// `StaleOrder` is special-cased by the convergence engine: the amend
/// target filled or cancelled between fetch and amend, so the whole
/// cycle restarts from ladder construction with a fresh snapshot.
#[derive(Debug, Error)]
pub enum ExchangeError {
  /// Network or protocol failure; the cycle aborts and the next one
  /// retries from scratch.
  #[error("transport failure: {0}")]
  Transport(String),
  /// Credentials rejected.
  #[error("authentication failed: {0}")]
  Auth(String),
  /// Exchange rate limit hit after client-side pacing and retries.
  #[error("rate limited by exchange")]
  RateLimited,
  /// Amend target is no longer amendable (filled/cancelled race).
  #[error("order no longer amendable: {0}")]
  StaleOrder(String),
  /// Request understood and refused by the exchange.
  #[error("request rejected: {0}")]
  Rejected(String),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// A new order to be placed.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
  pub side: OrderSide,
  pub price: f64,
  /// Quantity in contracts.
  pub qty: i64,
}

/// An amendment to a resting order.
///
/// `order_qty` is the total requested quantity (cumulative fills plus
/// the new desired quantity), matching the exchange amend semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct AmendRequest {
  pub order_id: String,
  pub side: OrderSide,
  pub price: f64,
  pub order_qty: i64,
}

/// Capability set the engine consumes. One implementor per exchange;
/// tests mock this trait.
#[async_trait]
pub trait Exchange: Send + Sync + 'static {
  /// Instrument metadata for `symbol`.
  async fn instrument(&self, symbol: &str) -> ExchangeResult<Instrument>;

  /// Current position on `symbol`; a flat position when none exists.
  async fn position(&self, symbol: &str) -> ExchangeResult<Position>;

  /// Account margin summary.
  async fn margin(&self) -> ExchangeResult<Margin>;

  /// All of this bot's open orders, in exchange-returned order.
  async fn open_orders(&self) -> ExchangeResult<Vec<Order>>;

  /// Top-of-book prices for `symbol`.
  async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

  /// Place a single resting limit order (used for signal entries).
  async fn place_order(&self, symbol: &str, qty: i64, price: f64) -> ExchangeResult<Order>;

  /// Place a batch of resting orders.
  async fn create_orders(&self, orders: &[OrderRequest]) -> ExchangeResult<Vec<Order>>;

  /// Amend a batch of resting orders in place.
  ///
  /// # Errors
  /// Returns `StaleOrder` when any target transitioned to a
  /// non-amendable status; the caller must refetch and re-converge.
  async fn amend_orders(&self, amends: &[AmendRequest]) -> ExchangeResult<Vec<Order>>;

  /// Cancel specific orders by exchange id.
  async fn cancel_orders(&self, order_ids: &[String]) -> ExchangeResult<()>;

  /// Cancel every open order belonging to this bot.
  ///
  /// Returns the number of orders cancelled. Used on reset and on the
  /// shutdown path.
  async fn cancel_all_orders(&self) -> ExchangeResult<usize>;

  /// Close `qty` contracts of the position at market.
  async fn close_position(&self, symbol: &str, qty: i64) -> ExchangeResult<()>;

  /// Set isolated-margin leverage on `symbol`.
  async fn set_leverage(&self, symbol: &str, leverage: f64) -> ExchangeResult<()>;

  /// Whether the transport considers its connection healthy.
  async fn is_connection_healthy(&self) -> bool;
}
