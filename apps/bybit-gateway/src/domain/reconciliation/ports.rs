//! Outbound ports used by the reconciler.

use crate::domain::order::{CancelRequest, ExchangeOrderId, FillUpdate, LocalOrderId, OrderSnapshot};

/// Sends a cancellation to the exchange once the exchange id is known.
///
/// Called while the reconciler holds its lock: implementations must only
/// enqueue work and must never call back into the reconciler.
#[cfg_attr(test, mockall::automock)]
pub trait CancelForwarder: Send + Sync {
    /// Forward `request` for the order the exchange knows as `exchange_id`.
    fn forward_cancel(&self, exchange_id: &ExchangeOrderId, request: &CancelRequest);
}

/// Receives order state changes. Invoked after the reconciler lock is released.
pub trait OrderListener: Send + Sync {
    /// A snapshot changed.
    fn on_order_update(&self, snapshot: &OrderSnapshot);

    /// A fill was attributed to a local order.
    fn on_fill(&self, local_id: &LocalOrderId, fill: &FillUpdate) {
        let _ = (local_id, fill);
    }
}
