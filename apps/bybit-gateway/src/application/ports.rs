//! Gateway Event Port (Driven Port)
//!
//! Interface through which the gateway reports order, fill and position
//! state, plus failed requests nobody else handled.

use std::sync::Arc;

use crate::domain::order::{FillUpdate, LocalOrderId, OrderSnapshot, PositionSnapshot};
use crate::domain::reconciliation::OrderListener;
use crate::infrastructure::rest::{Rejection, Request, RequestError, RequestFallback};

/// Port for gateway events.
///
/// Called from request tasks and from push ingestion, never while the
/// reconciler lock is held.
pub trait GatewayEvents: Send + Sync {
    /// An order snapshot changed.
    fn on_order_update(&self, snapshot: &OrderSnapshot);

    /// A fill was attributed to a local order.
    fn on_fill(&self, local_id: &LocalOrderId, fill: &FillUpdate) {
        tracing::info!(local_id = %local_id, exec_id = %fill.exec_id, qty = %fill.qty, price = %fill.price, "Fill");
    }

    /// A position was reported.
    fn on_position(&self, position: &PositionSnapshot) {
        tracing::info!(symbol = %position.symbol, size = %position.size, "Position");
    }

    /// A request without its own rejected handler was refused.
    fn on_request_rejected(&self, rejection: &Rejection, request: &Request) {
        tracing::warn!(rejection = %rejection, "Request rejected\n{request}");
    }

    /// A request without its own exception handler failed.
    fn on_request_exception(&self, error: &RequestError, request: &Request) {
        tracing::error!(error = %error, "Request failed\n{request}");
    }
}

/// Events sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEvents;

impl GatewayEvents for LoggingEvents {
    fn on_order_update(&self, snapshot: &OrderSnapshot) {
        tracing::info!(
            local_id = %snapshot.local_id,
            exchange_id = snapshot.exchange_id.as_ref().map(ToString::to_string),
            status = %snapshot.status,
            filled = %snapshot.filled_qty,
            "Order"
        );
    }
}

/// Adapts a [`GatewayEvents`] sink to the reconciler and engine ports.
#[derive(Clone)]
pub struct EventsBridge(pub Arc<dyn GatewayEvents>);

impl OrderListener for EventsBridge {
    fn on_order_update(&self, snapshot: &OrderSnapshot) {
        self.0.on_order_update(snapshot);
    }

    fn on_fill(&self, local_id: &LocalOrderId, fill: &FillUpdate) {
        self.0.on_fill(local_id, fill);
    }
}

impl RequestFallback for EventsBridge {
    fn on_request_rejected(&self, rejection: &Rejection, request: &Request) {
        self.0.on_request_rejected(rejection, request);
    }

    fn on_request_exception(&self, error: &RequestError, request: &Request) {
        self.0.on_request_exception(error, request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{ExchangeOrderId, OrderRequest, Side};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl GatewayEvents for Recording {
        fn on_order_update(&self, snapshot: &OrderSnapshot) {
            self.seen.lock().push(format!("order {}", snapshot.local_id));
        }

        fn on_fill(&self, local_id: &LocalOrderId, fill: &FillUpdate) {
            self.seen.lock().push(format!("fill {local_id} {}", fill.exec_id));
        }

        fn on_request_exception(&self, error: &RequestError, _request: &Request) {
            self.seen.lock().push(format!("exception {}", error.kind()));
        }
    }

    #[test]
    fn bridge_forwards_to_sink() {
        let sink = Arc::new(Recording::default());
        let bridge = EventsBridge(sink.clone());
        let local = LocalOrderId::new("t-1");
        let snapshot = OrderSnapshot::submitting(
            local.clone(),
            &OrderRequest::market("BTCUSD", Side::Buy, dec!(1)),
        );
        let fill = FillUpdate {
            exchange_id: ExchangeOrderId::new("EX1"),
            exec_id: "e1".to_string(),
            symbol: "BTCUSD".to_string(),
            price: dec!(30000),
            qty: dec!(1),
            executed_at: None,
        };

        OrderListener::on_order_update(&bridge, &snapshot);
        OrderListener::on_fill(&bridge, &local, &fill);
        RequestFallback::on_request_exception(
            &bridge,
            &RequestError::ShutDown,
            &Request::get("/x"),
        );

        assert_eq!(
            *sink.seen.lock(),
            vec![
                "order t-1".to_string(),
                "fill t-1 e1".to_string(),
                format!("exception {}", RequestError::ShutDown.kind()),
            ]
        );
    }
}
