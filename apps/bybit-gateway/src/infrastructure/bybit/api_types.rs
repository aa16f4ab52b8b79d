//! Bybit v2 REST response types.
//!
//! Every response is wrapped in `{ret_code, ret_msg, result}`; a non-zero
//! `ret_code` means the request was refused even when HTTP says 200.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::order::{
    ExchangeOrderId, LocalOrderId, OrderStatus, OrderType, OrderUpdate, PositionSnapshot, Side,
};

// ============================================================================
// Envelope
// ============================================================================

/// Response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Zero on success.
    #[serde(alias = "retCode")]
    pub ret_code: i64,
    /// Human-readable status.
    #[serde(default, alias = "retMsg")]
    pub ret_msg: String,
    /// Payload.
    pub result: Option<T>,
}

/// Application-level error carried by a response body, if any.
///
/// Accepts both the v2 (`ret_code`) and v5 (`retCode`) spellings.
pub fn envelope_error(body: &Value) -> Option<(i64, Option<String>)> {
    let code = body
        .get("ret_code")
        .or_else(|| body.get("retCode"))
        .and_then(Value::as_i64)?;
    if code == 0 {
        return None;
    }
    let message = body
        .get("ret_msg")
        .or_else(|| body.get("retMsg"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((code, message))
}

/// Decode the `result` of an envelope.
pub fn parse_result<T: DeserializeOwned>(body: Value) -> Result<T, serde_json::Error> {
    let envelope: ApiEnvelope<T> = serde_json::from_value(body)?;
    envelope
        .result
        .ok_or_else(|| serde::de::Error::custom("response envelope has no result"))
}

/// Either a single object or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A list.
    Many(Vec<T>),
    /// A single object.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Flatten into a vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Order as returned by create, cancel and active-order queries.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitOrder {
    /// Exchange order id.
    pub order_id: String,
    /// Client order id; empty when none was set.
    #[serde(default)]
    pub order_link_id: String,
    /// Contract symbol.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Order type.
    pub order_type: OrderType,
    /// Order price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    /// Order quantity.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub qty: Option<Decimal>,
    /// Order status.
    pub order_status: OrderStatus,
    /// Cumulative executed quantity.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub cum_exec_qty: Option<Decimal>,
    /// Last update time.
    #[serde(default, deserialize_with = "lenient_time")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Creation time.
    #[serde(default, deserialize_with = "lenient_time")]
    pub created_at: Option<DateTime<Utc>>,
}

impl BybitOrder {
    /// Exchange order id.
    #[must_use]
    pub fn exchange_id(&self) -> ExchangeOrderId {
        ExchangeOrderId::new(&self.order_id)
    }

    /// Client order id, if one was set.
    #[must_use]
    pub fn local_id(&self) -> Option<LocalOrderId> {
        (!self.order_link_id.is_empty()).then(|| LocalOrderId::new(&self.order_link_id))
    }

    /// Convert to a domain order update.
    #[must_use]
    pub fn to_update(&self) -> OrderUpdate {
        OrderUpdate {
            exchange_id: self.exchange_id(),
            local_id: self.local_id(),
            symbol: Some(self.symbol.clone()),
            side: Some(self.side),
            order_type: Some(self.order_type),
            price: self.price.filter(|p| !p.is_zero()),
            qty: self.qty,
            status: self.order_status,
            cum_exec_qty: self.cum_exec_qty,
            updated_at: self.updated_at.or(self.created_at),
        }
    }
}

// ============================================================================
// Positions
// ============================================================================

/// Position as returned by the position list.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitPosition {
    /// Contract symbol.
    pub symbol: String,
    /// `Buy`, `Sell` or `None` when flat.
    pub side: String,
    /// Position size.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub size: Option<Decimal>,
    /// Average entry price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub entry_price: Option<Decimal>,
    /// Unrealised profit and loss.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub unrealised_pnl: Option<Decimal>,
}

/// Position list entry when querying all symbols.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PositionEntry {
    /// `{data: {...}, is_valid}` wrapper.
    Wrapped {
        /// Position payload.
        data: BybitPosition,
    },
    /// Bare position.
    Bare(BybitPosition),
}

impl PositionEntry {
    /// The position payload.
    #[must_use]
    pub fn into_position(self) -> BybitPosition {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

impl BybitPosition {
    /// Convert to a domain position snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> PositionSnapshot {
        let side = match self.side.as_str() {
            "Buy" => Some(Side::Buy),
            "Sell" => Some(Side::Sell),
            _ => None,
        };
        PositionSnapshot {
            symbol: self.symbol.clone(),
            side,
            size: self.size.unwrap_or_default(),
            entry_price: self.entry_price.unwrap_or_default(),
            unrealised_pnl: self.unrealised_pnl.unwrap_or_default(),
        }
    }
}

// ============================================================================
// Lenient field parsing
// ============================================================================

/// Decimal sent as a number, a numeric string or an empty string.
fn lenient_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Decimal>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    let text = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(serde::de::Error::custom(format!("expected decimal, got {other}")));
        }
    };
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// RFC 3339 timestamp; anything unparseable is treated as absent.
fn lenient_time<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc)))
}
