//! Exchange Adapter — `Exchange` Port over the REST Client
//!
//! Implements the exchange capability set against the BitMEX REST API
//! using the shared signing client. Every payload is parsed into the
//! typed domain views at this boundary. Dry-run mode logs every
//! mutation instead of sending it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::client::RestClient;
use super::types::{AmendOrderBody, InstrumentDto, MarginDto, NewOrderBody, OrderDto, PositionDto};
use crate::config::AppConfig;
use crate::domain::market::{
    Instrument, Margin, Order, OrderSide, Position, SATOSHIS_PER_XBT, Ticker, round_to_tick,
};
use crate::ports::exchange::{
    AmendRequest, Exchange, ExchangeError, ExchangeResult, OrderRequest,
};

/// All of this bot's open orders, newest last. The open filter is a
/// fixed, pre-encoded query so the signed path matches the wire bytes.
const OPEN_ORDERS_PATH: &str = "/order?filter=%7B%22open%22%3Atrue%7D&reverse=false";

/// Exchange port implementation over the REST transport.
pub struct BitmexExchange {
    /// Shared signing REST client.
    client: RestClient,
    /// Default symbol, used for health checks and dry-run views.
    symbol: String,
    /// Client order id prefix; also the ownership filter on reads.
    order_id_prefix: String,
    /// Send ladder orders post-only.
    post_only: bool,
    /// Log mutations instead of sending them.
    dry_run: bool,
    /// Balance reported while in dry-run mode, in XBT.
    dry_run_balance_xbt: f64,
    /// Hard cap applied to every leverage request.
    leverage_cap: f64,
}

impl BitmexExchange {
    pub fn new(client: RestClient, config: &AppConfig) -> Self {
        Self {
            client,
            symbol: config.exchange.symbol.clone(),
            order_id_prefix: config.exchange.order_id_prefix.clone(),
            post_only: config.exchange.post_only,
            dry_run: config.bot.dry_run,
            dry_run_balance_xbt: config.bot.dry_run_balance_xbt,
            leverage_cap: config.risk.leverage,
        }
    }

    /// Fresh client order id under this bot's prefix.
    ///
    /// The exchange caps clOrdID at 36 characters; the prefix is at
    /// most 13, so 22 hex characters of a v4 UUID fit alongside it.
    fn client_order_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}{}", self.order_id_prefix, &suffix[..22])
    }

    /// Whether a live order was placed by this bot.
    fn is_ours(&self, order: &Order) -> bool {
        order
            .cl_ord_id
            .as_deref()
            .is_some_and(|id| id.starts_with(&self.order_id_prefix))
    }

    fn side_str(side: OrderSide) -> &'static str {
        match side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }

    /// Synthesized order view for dry-run mutations.
    fn dry_run_order(&self, side: OrderSide, price: f64, qty: i64) -> Order {
        Order {
            order_id: Uuid::new_v4().to_string(),
            cl_ord_id: Some(self.client_order_id()),
            side,
            price,
            order_qty: qty,
            cum_qty: 0,
            leaves_qty: qty,
            ord_status: "New".to_string(),
        }
    }
}

#[async_trait]
impl Exchange for BitmexExchange {
    async fn instrument(&self, symbol: &str) -> ExchangeResult<Instrument> {
        let path = format!("/instrument?symbol={symbol}&count=1");
        let mut instruments: Vec<InstrumentDto> = self.client.get(&path).await?;
        let dto = instruments
            .pop()
            .ok_or_else(|| ExchangeError::Transport(format!("unknown instrument {symbol}")))?;
        Instrument::try_from(dto)
    }

    async fn position(&self, symbol: &str) -> ExchangeResult<Position> {
        let positions: Vec<PositionDto> = self.client.get("/position").await?;
        let position = positions
            .into_iter()
            .find(|p| p.symbol == symbol)
            .map(Position::from)
            .unwrap_or_else(|| Position::flat(symbol, self.leverage_cap));
        Ok(position)
    }

    async fn margin(&self) -> ExchangeResult<Margin> {
        if self.dry_run {
            return Ok(Margin {
                margin_balance: self.dry_run_balance_xbt * SATOSHIS_PER_XBT,
                available_funds: self.dry_run_balance_xbt * SATOSHIS_PER_XBT,
            });
        }
        let dto: MarginDto = self.client.get("/user/margin").await?;
        Ok(Margin::from(dto))
    }

    async fn open_orders(&self) -> ExchangeResult<Vec<Order>> {
        if self.dry_run {
            return Ok(Vec::new());
        }
        let dtos: Vec<OrderDto> = self.client.get(OPEN_ORDERS_PATH).await?;
        let orders = dtos
            .into_iter()
            .map(Order::try_from)
            .collect::<ExchangeResult<Vec<_>>>()?;
        Ok(orders.into_iter().filter(|o| self.is_ours(o)).collect())
    }

    async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let instrument = self.instrument(symbol).await?;
        let (Some(bid), Some(ask)) = (instrument.bid_price, instrument.ask_price) else {
            return Err(ExchangeError::Transport(format!(
                "no top of book for {symbol}"
            )));
        };
        let mid = instrument.mid_price.unwrap_or((bid + ask) / 2.0);
        let tick = instrument.tick_size;
        Ok(Ticker {
            buy: round_to_tick(bid, tick),
            sell: round_to_tick(ask, tick),
            mid: round_to_tick(mid, tick),
        })
    }

    #[instrument(skip(self))]
    async fn place_order(&self, symbol: &str, qty: i64, price: f64) -> ExchangeResult<Order> {
        let side = if qty >= 0 { OrderSide::Buy } else { OrderSide::Sell };
        if self.dry_run {
            info!(symbol, qty, price, "DRY RUN: would place order");
            return Ok(self.dry_run_order(side, price, qty.abs()));
        }
        let body = json!({
            "symbol": symbol,
            "orderQty": qty,
            "price": price,
            "clOrdID": self.client_order_id(),
        });
        let dto: OrderDto = self.client.post("/order", &body).await?;
        Order::try_from(dto)
    }

    async fn create_orders(&self, orders: &[OrderRequest]) -> ExchangeResult<Vec<Order>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        if self.dry_run {
            info!(count = orders.len(), "DRY RUN: would create orders");
            return Ok(orders
                .iter()
                .map(|o| self.dry_run_order(o.side, o.price, o.qty))
                .collect());
        }

        let exec_inst = self
            .post_only
            .then(|| "ParticipateDoNotInitiate".to_string());
        let bodies: Vec<NewOrderBody> = orders
            .iter()
            .map(|o| NewOrderBody {
                symbol: self.symbol.clone(),
                side: Self::side_str(o.side).to_string(),
                order_qty: o.qty,
                price: o.price,
                cl_ord_id: self.client_order_id(),
                exec_inst: exec_inst.clone(),
            })
            .collect();

        let dtos: Vec<OrderDto> = self
            .client
            .post("/order/bulk", &json!({ "orders": bodies }))
            .await?;
        dtos.into_iter().map(Order::try_from).collect()
    }

    async fn amend_orders(&self, amends: &[AmendRequest]) -> ExchangeResult<Vec<Order>> {
        if amends.is_empty() {
            return Ok(Vec::new());
        }
        if self.dry_run {
            info!(count = amends.len(), "DRY RUN: would amend orders");
            return Ok(Vec::new());
        }

        let bodies: Vec<AmendOrderBody> = amends
            .iter()
            .map(|a| AmendOrderBody {
                order_id: a.order_id.clone(),
                order_qty: a.order_qty,
                price: a.price,
            })
            .collect();

        let dtos: Vec<OrderDto> = self
            .client
            .put("/order/bulk", &json!({ "orders": bodies }))
            .await?;
        dtos.into_iter().map(Order::try_from).collect()
    }

    async fn cancel_orders(&self, order_ids: &[String]) -> ExchangeResult<()> {
        if order_ids.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            info!(count = order_ids.len(), "DRY RUN: would cancel orders");
            return Ok(());
        }
        let _: Vec<OrderDto> = self
            .client
            .delete("/order", &json!({ "orderID": order_ids }))
            .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self) -> ExchangeResult<usize> {
        // Cancel by id from a fresh fetch rather than the exchange-side
        // cancel-all, so manually placed orders and other bots' orders
        // are never touched.
        let orders = self.open_orders().await?;
        if orders.is_empty() {
            return Ok(0);
        }
        for order in &orders {
            debug!(
                side = %order.side,
                qty = order.order_qty,
                price = order.price,
                "Canceling"
            );
        }
        let ids: Vec<String> = orders.iter().map(|o| o.order_id.clone()).collect();
        self.cancel_orders(&ids).await?;
        Ok(ids.len())
    }

    #[instrument(skip(self))]
    async fn close_position(&self, symbol: &str, qty: i64) -> ExchangeResult<()> {
        if self.dry_run {
            info!(symbol, qty, "DRY RUN: would close position at market");
            return Ok(());
        }
        let body = json!({
            "symbol": symbol,
            "ordType": "Market",
            "orderQty": qty,
            "execInst": "Close",
        });
        let _: serde_json::Value = self.client.post("/order", &body).await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: f64) -> ExchangeResult<()> {
        // Never exceed the configured target regardless of what the
        // caller asks for.
        let leverage = leverage.min(self.leverage_cap);
        if self.dry_run {
            info!(symbol, leverage, "DRY RUN: would set leverage");
            return Ok(());
        }
        let body = json!({ "symbol": symbol, "leverage": leverage });
        let _: serde_json::Value = self.client.post("/position/leverage", &body).await?;
        Ok(())
    }

    async fn is_connection_healthy(&self) -> bool {
        let path = format!("/instrument?symbol={}&count=1", self.symbol);
        self.client.ping(&path).await
    }
}
