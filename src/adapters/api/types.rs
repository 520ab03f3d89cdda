//! Wire Types — REST API Payloads
//!
//! Serde DTOs for the exchange REST API, plus validated conversions
//! into the typed domain views. Absent optional fields (for instance
//! the liquidation price on a flat position) become explicit `Option`s
//! here; the engine never checks for missing keys.

use serde::{Deserialize, Serialize};

use crate::domain::market::{Instrument, Margin, Order, OrderSide, Position};
use crate::ports::exchange::ExchangeError;

/// Error envelope returned by the exchange on 4xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiError,
}

/// The error object inside the envelope.
#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub message: String,
    #[serde(default)]
    pub name: String,
}

/// Instrument payload from GET /instrument.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentDto {
    pub symbol: String,
    pub state: String,
    pub tick_size: f64,
    #[serde(default)]
    pub multiplier: f64,
    #[serde(default)]
    pub is_quanto: bool,
    #[serde(default)]
    pub is_inverse: bool,
    #[serde(default)]
    pub mark_price: f64,
    #[serde(default)]
    pub indicative_settle_price: f64,
    pub mid_price: Option<f64>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    #[serde(default)]
    pub init_margin: f64,
    pub underlying_to_settle_multiplier: Option<f64>,
    pub quote_to_settle_multiplier: Option<f64>,
}

/// Decimal places needed to print a price at tick precision.
///
/// Derived from the shortest decimal rendering of the tick size, so a
/// tick of 0.25 yields 2 and a tick of 0.5 yields 1.
fn tick_log(tick_size: f64) -> u32 {
    let rendered = format!("{tick_size}");
    rendered
        .split_once('.')
        .map_or(0, |(_, frac)| frac.len() as u32)
}

impl TryFrom<InstrumentDto> for Instrument {
    type Error = ExchangeError;

    fn try_from(dto: InstrumentDto) -> Result<Self, Self::Error> {
        if dto.tick_size <= 0.0 {
            return Err(ExchangeError::Transport(format!(
                "instrument {} has invalid tickSize {}",
                dto.symbol, dto.tick_size
            )));
        }
        Ok(Self {
            tick_log: tick_log(dto.tick_size),
            symbol: dto.symbol,
            state: dto.state,
            tick_size: dto.tick_size,
            multiplier: dto.multiplier,
            is_quanto: dto.is_quanto,
            is_inverse: dto.is_inverse,
            mark_price: dto.mark_price,
            indicative_settle_price: dto.indicative_settle_price,
            mid_price: dto.mid_price,
            bid_price: dto.bid_price,
            ask_price: dto.ask_price,
            init_margin: dto.init_margin,
            underlying_to_settle_multiplier: dto.underlying_to_settle_multiplier,
            quote_to_settle_multiplier: dto.quote_to_settle_multiplier,
        })
    }
}

/// Position payload from GET /position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub symbol: String,
    #[serde(default)]
    pub current_qty: i64,
    pub avg_entry_price: Option<f64>,
    pub avg_cost_price: Option<f64>,
    #[serde(default)]
    pub unrealised_gross_pnl: f64,
    pub unrealised_pnl_pcnt: Option<f64>,
    pub unrealised_roe_pcnt: Option<f64>,
    pub liquidation_price: Option<f64>,
    #[serde(default)]
    pub leverage: f64,
    pub mark_price: Option<f64>,
}

impl From<PositionDto> for Position {
    fn from(dto: PositionDto) -> Self {
        Self {
            symbol: dto.symbol,
            current_qty: dto.current_qty,
            avg_entry_price: dto.avg_entry_price,
            avg_cost_price: dto.avg_cost_price,
            unrealised_gross_pnl: dto.unrealised_gross_pnl,
            unrealised_pnl_pcnt: dto.unrealised_pnl_pcnt,
            unrealised_roe_pcnt: dto.unrealised_roe_pcnt,
            liquidation_price: dto.liquidation_price,
            leverage: dto.leverage,
            mark_price: dto.mark_price,
        }
    }
}

/// Margin payload from GET /user/margin. Balances in satoshis.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginDto {
    #[serde(default)]
    pub margin_balance: f64,
    #[serde(default)]
    pub available_funds: f64,
}

impl From<MarginDto> for Margin {
    fn from(dto: MarginDto) -> Self {
        Self {
            margin_balance: dto.margin_balance,
            available_funds: dto.available_funds,
        }
    }
}

/// Order payload from GET /order and order mutation responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: Option<String>,
    pub side: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub order_qty: i64,
    #[serde(default)]
    pub cum_qty: i64,
    #[serde(default)]
    pub leaves_qty: i64,
    #[serde(default)]
    pub ord_status: String,
}

impl TryFrom<OrderDto> for Order {
    type Error = ExchangeError;

    fn try_from(dto: OrderDto) -> Result<Self, Self::Error> {
        let side = match dto.side.as_str() {
            "Buy" => OrderSide::Buy,
            "Sell" => OrderSide::Sell,
            other => {
                return Err(ExchangeError::Transport(format!(
                    "order {} has unknown side {other:?}",
                    dto.order_id
                )));
            }
        };
        Ok(Self {
            order_id: dto.order_id,
            cl_ord_id: dto.cl_ord_id,
            side,
            price: dto.price.unwrap_or_default(),
            order_qty: dto.order_qty,
            cum_qty: dto.cum_qty,
            leaves_qty: dto.leaves_qty,
            ord_status: dto.ord_status,
        })
    }
}

/// Body for POST /order and entries of POST /order/bulk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderBody {
    pub symbol: String,
    pub side: String,
    pub order_qty: i64,
    pub price: f64,
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_inst: Option<String>,
}

/// Body for PUT /order entries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmendOrderBody {
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub order_qty: i64,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_log_values() {
        assert_eq!(tick_log(1.0), 0);
        assert_eq!(tick_log(0.5), 1);
        assert_eq!(tick_log(0.25), 2);
        assert_eq!(tick_log(0.05), 2);
        assert_eq!(tick_log(0.01), 2);
        assert_eq!(tick_log(0.001), 3);
    }

    #[test]
    fn test_instrument_parse_and_convert() {
        let json = r#"{
            "symbol": "XBTUSD",
            "state": "Open",
            "tickSize": 0.5,
            "multiplier": -100000000,
            "isQuanto": false,
            "isInverse": true,
            "markPrice": 50000.1,
            "indicativeSettlePrice": 49990.0,
            "midPrice": 50000.25,
            "bidPrice": 50000.0,
            "askPrice": 50000.5,
            "initMargin": 0.01,
            "underlyingToSettleMultiplier": -100000000
        }"#;
        let dto: InstrumentDto = serde_json::from_str(json).unwrap();
        let instrument = Instrument::try_from(dto).unwrap();
        assert_eq!(instrument.tick_log, 1);
        assert!(instrument.is_inverse);
        assert_eq!(instrument.mid_price, Some(50_000.25));
    }

    #[test]
    fn test_instrument_invalid_tick_rejected() {
        let json = r#"{"symbol": "XBTUSD", "state": "Open", "tickSize": 0.0}"#;
        let dto: InstrumentDto = serde_json::from_str(json).unwrap();
        assert!(Instrument::try_from(dto).is_err());
    }

    #[test]
    fn test_flat_position_has_no_liquidation_price() {
        let json = r#"{"symbol": "XBTUSD", "currentQty": 0, "leverage": 25}"#;
        let dto: PositionDto = serde_json::from_str(json).unwrap();
        let position = Position::from(dto);
        assert!(position.is_flat());
        assert!(position.liquidation_price.is_none());
        assert!(position.unrealised_roe_pcnt.is_none());
    }

    #[test]
    fn test_order_parse_and_side_validation() {
        let json = r#"{
            "orderID": "abc-123",
            "clOrdID": "ladder_f00",
            "side": "Buy",
            "price": 50000.0,
            "orderQty": 100,
            "cumQty": 40,
            "leavesQty": 60,
            "ordStatus": "PartiallyFilled"
        }"#;
        let dto: OrderDto = serde_json::from_str(json).unwrap();
        let order = Order::try_from(dto).unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.leaves_qty, 60);

        let bad = OrderDto {
            side: "Hold".to_string(),
            ..serde_json::from_str::<OrderDto>(json).unwrap()
        };
        assert!(Order::try_from(bad).is_err());
    }

    #[test]
    fn test_new_order_body_serializes_cl_ord_id() {
        let body = NewOrderBody {
            symbol: "XBTUSD".to_string(),
            side: "Sell".to_string(),
            order_qty: 10,
            price: 50_100.0,
            cl_ord_id: "ladder_ab12cd".to_string(),
            exec_inst: Some("ParticipateDoNotInitiate".to_string()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["clOrdID"], "ladder_ab12cd");
        assert_eq!(json["execInst"], "ParticipateDoNotInitiate");
        assert_eq!(json["orderQty"], 10);
    }
}
