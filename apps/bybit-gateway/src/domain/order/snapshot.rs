//! Order snapshots and the exchange updates that mutate them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::{ExchangeOrderId, LocalOrderId};
use super::requests::OrderRequest;
use super::value_objects::{OrderStatus, OrderType, Side};

/// Order status update pushed (or returned) by the exchange.
///
/// Only `exchange_id` and `status` are mandatory; absent fields leave the
/// corresponding snapshot field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Exchange order id the update refers to.
    pub exchange_id: ExchangeOrderId,
    /// Local id echoed back by the exchange, if any.
    pub local_id: Option<LocalOrderId>,
    /// Contract symbol.
    pub symbol: Option<String>,
    /// Order side.
    pub side: Option<Side>,
    /// Order type.
    pub order_type: Option<OrderType>,
    /// Order price.
    pub price: Option<Decimal>,
    /// Order quantity.
    pub qty: Option<Decimal>,
    /// Reported status.
    pub status: OrderStatus,
    /// Cumulative executed quantity.
    pub cum_exec_qty: Option<Decimal>,
    /// Exchange timestamp of the update.
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderUpdate {
    /// Minimal update carrying only a status.
    #[must_use]
    pub const fn status(exchange_id: ExchangeOrderId, status: OrderStatus) -> Self {
        Self {
            exchange_id,
            local_id: None,
            symbol: None,
            side: None,
            order_type: None,
            price: None,
            qty: None,
            status,
            cum_exec_qty: None,
            updated_at: None,
        }
    }

    /// Set the cumulative executed quantity.
    #[must_use]
    pub fn with_cum_exec_qty(mut self, qty: Decimal) -> Self {
        self.cum_exec_qty = Some(qty);
        self
    }
}

/// Single execution (fill) reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillUpdate {
    /// Exchange order id the fill belongs to.
    pub exchange_id: ExchangeOrderId,
    /// Exchange execution id.
    pub exec_id: String,
    /// Contract symbol.
    pub symbol: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub qty: Decimal,
    /// Execution time.
    pub executed_at: Option<DateTime<Utc>>,
}

/// Last known state of an order, keyed by local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Local order id.
    pub local_id: LocalOrderId,
    /// Exchange order id, once bound.
    pub exchange_id: Option<ExchangeOrderId>,
    /// Contract symbol (empty if never reported).
    pub symbol: String,
    /// Order side.
    pub side: Option<Side>,
    /// Order type.
    pub order_type: Option<OrderType>,
    /// Order price.
    pub price: Option<Decimal>,
    /// Order quantity.
    pub qty: Decimal,
    /// Cumulative filled quantity.
    pub filled_qty: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Time of the last applied exchange update.
    pub updated_at: Option<DateTime<Utc>>,
    /// Incremented on every applied update; listeners can drop stale copies.
    pub version: u64,
}

impl OrderSnapshot {
    /// Snapshot for an order placed locally and not yet acknowledged.
    #[must_use]
    pub fn submitting(local_id: LocalOrderId, request: &OrderRequest) -> Self {
        Self {
            local_id,
            exchange_id: None,
            symbol: request.symbol.clone(),
            side: Some(request.side),
            order_type: Some(request.order_type),
            price: request.price,
            qty: request.qty,
            filled_qty: Decimal::ZERO,
            status: OrderStatus::Submitting,
            updated_at: None,
            version: 0,
        }
    }

    /// Snapshot built entirely from an exchange update.
    #[must_use]
    pub fn from_update(local_id: LocalOrderId, update: &OrderUpdate) -> Self {
        let mut snapshot = Self {
            local_id,
            exchange_id: None,
            symbol: String::new(),
            side: None,
            order_type: None,
            price: None,
            qty: Decimal::ZERO,
            filled_qty: Decimal::ZERO,
            status: update.status,
            updated_at: None,
            version: 0,
        };
        snapshot.apply(update);
        snapshot
    }

    /// Overwrite fields with whatever the update carries.
    pub fn apply(&mut self, update: &OrderUpdate) {
        self.exchange_id = Some(update.exchange_id.clone());
        self.status = update.status;
        if let Some(symbol) = &update.symbol {
            self.symbol.clone_from(symbol);
        }
        if update.side.is_some() {
            self.side = update.side;
        }
        if update.order_type.is_some() {
            self.order_type = update.order_type;
        }
        if update.price.is_some() {
            self.price = update.price;
        }
        if let Some(qty) = update.qty {
            self.qty = qty;
        }
        if let Some(filled) = update.cum_exec_qty {
            self.filled_qty = filled;
        }
        if update.updated_at.is_some() {
            self.updated_at = update.updated_at;
        }
        self.version += 1;
    }

    /// Mark the order rejected locally (placement failed or was refused).
    pub fn mark_rejected(&mut self) {
        self.status = OrderStatus::Rejected;
        self.version += 1;
    }

    /// Returns true if the order can still trade or be cancelled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
