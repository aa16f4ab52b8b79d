//! Requests strategies hand to the gateway, and position snapshots it reports back.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::LocalOrderId;
use super::value_objects::{OrderType, Side, TimeInForce};

/// Request to place a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Contract symbol, e.g. `BTCUSD`.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Order type.
    pub order_type: OrderType,
    /// Order quantity in contracts.
    pub qty: Decimal,
    /// Limit price (required for limit orders).
    pub price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Only reduce an existing position.
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Create a limit order request.
    #[must_use]
    pub fn limit(symbol: impl Into<String>, side: Side, qty: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            time_in_force: TimeInForce::GoodTillCancel,
            reduce_only: false,
        }
    }

    /// Create a market order request.
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: Side, qty: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            time_in_force: TimeInForce::ImmediateOrCancel,
            reduce_only: false,
        }
    }

    /// Set time in force.
    #[must_use]
    pub const fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Mark the order reduce-only.
    #[must_use]
    pub const fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Request to cancel an order, keyed by its local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Local id of the order to cancel.
    pub local_id: LocalOrderId,
    /// Contract symbol (Bybit requires it on cancel).
    pub symbol: String,
}

impl CancelRequest {
    /// Create a cancel request.
    #[must_use]
    pub fn new(local_id: LocalOrderId, symbol: impl Into<String>) -> Self {
        Self {
            local_id,
            symbol: symbol.into(),
        }
    }
}

/// Position held on one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Contract symbol.
    pub symbol: String,
    /// Position side; `None` when flat.
    pub side: Option<Side>,
    /// Position size in contracts.
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Unrealised profit and loss.
    pub unrealised_pnl: Decimal,
}
