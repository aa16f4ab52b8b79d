//! Order value objects using Bybit's wire spelling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl Side {
    /// Wire value for request parameters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Limit order.
    Limit,
    /// Market order.
    Market,
}

impl OrderType {
    /// Wire value for request parameters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "Limit",
            Self::Market => "Market",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled.
    #[default]
    GoodTillCancel,
    /// Immediate or cancel.
    ImmediateOrCancel,
    /// Fill or kill.
    FillOrKill,
    /// Maker only.
    PostOnly,
}

impl TimeInForce {
    /// Wire value for request parameters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GoodTillCancel => "GoodTillCancel",
            Self::ImmediateOrCancel => "ImmediateOrCancel",
            Self::FillOrKill => "FillOrKill",
            Self::PostOnly => "PostOnly",
        }
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status as reported by Bybit, plus the local `Submitting` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Placed locally, no acknowledgement from the exchange yet.
    Submitting,
    /// Accepted by the matching engine but not yet on the book.
    Created,
    /// Resting on the book.
    New,
    /// Partially filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancel requested, awaiting confirmation.
    PendingCancel,
    /// Cancelled.
    Cancelled,
    /// Rejected by the exchange (or failed to reach it).
    Rejected,
    /// Conditional order waiting for its trigger.
    Untriggered,
    /// Conditional order triggered.
    Triggered,
    /// Conditional order cancelled before triggering.
    Deactivated,
    /// Conditional order active.
    Active,
    /// Status string not recognised by this gateway.
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Returns true if the order can still trade or be cancelled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Submitting
                | Self::Created
                | Self::New
                | Self::PartiallyFilled
                | Self::PendingCancel
                | Self::Untriggered
                | Self::Active
        )
    }

    /// Returns true if the order reached a final state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Deactivated
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitting => "Submitting",
            Self::Created => "Created",
            Self::New => "New",
            Self::PartiallyFilled => "PartiallyFilled",
            Self::Filled => "Filled",
            Self::PendingCancel => "PendingCancel",
            Self::Cancelled => "Cancelled",
            Self::Rejected => "Rejected",
            Self::Untriggered => "Untriggered",
            Self::Triggered => "Triggered",
            Self::Deactivated => "Deactivated",
            Self::Active => "Active",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}
