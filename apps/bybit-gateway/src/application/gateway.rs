//! Bybit Gateway Facade
//!
//! The surface strategies talk to. Placing an order allocates a local id,
//! records a `Submitting` snapshot and submits the create request; the
//! response either binds the exchange id or marks the order rejected. When
//! the create fails in a way that leaves its fate unknown (a timeout, a
//! dropped connection) the order stays `Submitting`, a buffered cancel stays
//! buffered, and the symbol's active orders are queried to find it.
//! Cancels, pushes and fills go through the reconciler so that they can
//! arrive before the exchange id is known.

use std::sync::Arc;

use serde_json::Value;

use crate::config::GatewayConfig;
use crate::domain::order::{
    CancelRequest, FillUpdate, LocalIdAllocator, LocalOrderId, OrderRequest, OrderSnapshot,
    OrderUpdate,
};
use crate::domain::reconciliation::{
    CancelDisposition, FillDisposition, IdentityError, OrderReconciler, PushDisposition,
};
use crate::error::GatewayError;
use crate::infrastructure::bybit::api_types::{OneOrMany, PositionEntry, parse_result};
use crate::infrastructure::bybit::rest_api::{
    active_orders_request, create_order_request, positions_request,
};
use crate::infrastructure::bybit::{BybitOrder, BybitRestApi};
use crate::infrastructure::metrics;
use crate::infrastructure::rest::{
    Rejection, Request, RequestError, RequestHandle, SessionFactory, Signer,
};

use super::ports::{EventsBridge, GatewayEvents};

/// An order handed to the exchange.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    /// Local id assigned before submission.
    pub local_id: LocalOrderId,
    /// Handle on the create request.
    pub handle: RequestHandle,
}

/// Bybit REST gateway.
pub struct BybitGateway {
    api: Arc<BybitRestApi>,
    reconciler: Arc<OrderReconciler>,
    events: Arc<dyn GatewayEvents>,
}

impl std::fmt::Debug for BybitGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitGateway")
            .field("api", &self.api)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl BybitGateway {
    /// Build the gateway on the current Tokio runtime.
    pub fn connect(
        config: &GatewayConfig,
        events: Arc<dyn GatewayEvents>,
    ) -> Result<Self, GatewayError> {
        Self::with_session_factory(config, events, None)
    }

    /// Build the gateway with a custom transport.
    pub fn with_session_factory(
        config: &GatewayConfig,
        events: Arc<dyn GatewayEvents>,
        factory: Option<Arc<dyn SessionFactory>>,
    ) -> Result<Self, GatewayError> {
        let signer = Signer::new(&config.exchange.api_key, &config.exchange.api_secret)?;
        let bridge = EventsBridge(Arc::clone(&events));
        let api = Arc::new(BybitRestApi::connect(
            config.exchange.rest_base_url(),
            signer,
            config.engine.to_options(),
            Arc::new(bridge.clone()),
            factory,
            None,
        )?);

        let ids = config
            .orders
            .id_prefix
            .as_ref()
            .map_or_else(LocalIdAllocator::from_start_time, LocalIdAllocator::new);
        let reconciler = Arc::new(OrderReconciler::new(ids, api.clone(), Arc::new(bridge)));

        tracing::info!(
            server = %config.exchange.server,
            rest_url = config.exchange.rest_base_url(),
            "Bybit gateway connected"
        );

        Ok(Self {
            api,
            reconciler,
            events,
        })
    }

    /// Place an order. Returns as soon as the request is queued.
    pub fn place_order(&self, order: OrderRequest) -> SubmittedOrder {
        let local_id = self.reconciler.new_local_id();
        let snapshot = OrderSnapshot::submitting(local_id.clone(), &order);
        self.reconciler.track_order(snapshot.clone());
        self.events.on_order_update(&snapshot);

        let on_ack = {
            let reconciler = Arc::clone(&self.reconciler);
            let local_id = local_id.clone();
            move |body: Value, _: &Request| acknowledge(&reconciler, &local_id, body)
        };
        let on_rejected = {
            let reconciler = Arc::clone(&self.reconciler);
            let events = Arc::clone(&self.events);
            let local_id = local_id.clone();
            move |rejection: &Rejection, request: &Request| {
                reconciler.reject_order(&local_id);
                events.on_request_rejected(rejection, request);
            }
        };
        let on_exception = {
            let api = Arc::clone(&self.api);
            let reconciler = Arc::clone(&self.reconciler);
            let events = Arc::clone(&self.events);
            let local_id = local_id.clone();
            let symbol = order.symbol.clone();
            move |error: &RequestError, request: &Request| {
                if error.may_have_been_sent() {
                    tracing::warn!(local_id = %local_id, error = %error, "Order create outcome unknown, querying active orders");
                    api.send(active_orders_sync(&reconciler, &symbol));
                } else {
                    reconciler.reject_order(&local_id);
                }
                events.on_request_exception(error, request);
            }
        };

        let request = create_order_request(&local_id, &order)
            .on_success(on_ack)
            .on_rejected(on_rejected)
            .on_exception(on_exception);

        tracing::info!(local_id = %local_id, symbol = %order.symbol, side = %order.side, qty = %order.qty, "Placing order");
        let handle = self.api.send(request);
        SubmittedOrder { local_id, handle }
    }

    /// Cancel an order by local id, buffering it if the exchange id is not
    /// known yet.
    pub fn cancel_order(&self, request: CancelRequest) -> Result<CancelDisposition, IdentityError> {
        let disposition = self.reconciler.request_cancel(request)?;
        metrics::set_pending_events("cancel", self.reconciler.pending_cancel_count());
        Ok(disposition)
    }

    /// Last known state of an order.
    pub fn get_order(&self, local_id: &LocalOrderId) -> Option<OrderSnapshot> {
        self.reconciler.get_snapshot(local_id)
    }

    /// Orders that can still trade.
    pub fn active_orders(&self) -> Vec<OrderSnapshot> {
        self.reconciler.active_orders()
    }

    /// Ingest an order push from the exchange.
    pub fn on_order_push(&self, update: OrderUpdate) -> PushDisposition {
        let disposition = self.reconciler.record_push(update);
        metrics::set_pending_events("push", self.reconciler.pending_push_count());
        disposition
    }

    /// Ingest an execution push from the exchange.
    pub fn on_execution_push(&self, fill: FillUpdate) -> FillDisposition {
        self.reconciler.record_fill(fill)
    }

    /// Query positions, for one symbol or all of them.
    pub fn query_positions(&self, symbol: Option<&str>) -> RequestHandle {
        let events = Arc::clone(&self.events);
        let request = positions_request(symbol).on_success(move |body, _| {
            match parse_result::<OneOrMany<PositionEntry>>(body) {
                Ok(entries) => {
                    for entry in entries.into_vec() {
                        events.on_position(&entry.into_position().to_snapshot());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to parse position list"),
            }
        });
        self.api.send(request)
    }

    /// Query active orders on `symbol` and fold them into the reconciler.
    ///
    /// Orders carrying one of this process's local ids are bound to it;
    /// anything else is adopted under a fresh local id.
    pub fn query_active_orders(&self, symbol: &str) -> RequestHandle {
        self.api.send(active_orders_sync(&self.reconciler, symbol))
    }

    /// The reconciler behind this gateway.
    pub fn reconciler(&self) -> &OrderReconciler {
        &self.reconciler
    }

    /// The REST client behind this gateway.
    pub fn api(&self) -> &BybitRestApi {
        &self.api
    }

    /// Stop accepting requests and wait for outstanding ones to resolve.
    pub async fn shutdown(&self) {
        self.api.shutdown().await;
        tracing::info!(
            pending_pushes = self.reconciler.pending_push_count(),
            pending_cancels = self.reconciler.pending_cancel_count(),
            "Bybit gateway stopped"
        );
    }
}

fn acknowledge(reconciler: &OrderReconciler, local_id: &LocalOrderId, body: Value) {
    let order = match parse_result::<BybitOrder>(body) {
        Ok(order) => order,
        Err(e) => {
            tracing::error!(local_id = %local_id, error = %e, "Unreadable order-create response");
            return;
        }
    };
    if let Err(e) = reconciler.acknowledge(local_id, &order.to_update()) {
        tracing::error!(local_id = %local_id, error = %e, "Order acknowledgement refused");
    }
}

fn active_orders_sync(reconciler: &Arc<OrderReconciler>, symbol: &str) -> Request {
    let reconciler = Arc::clone(reconciler);
    active_orders_request(symbol).on_success(move |body, _| {
        match parse_result::<OneOrMany<BybitOrder>>(body) {
            Ok(orders) => {
                for order in orders.into_vec() {
                    sync_order(&reconciler, &order);
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to parse active orders"),
        }
    })
}

fn sync_order(reconciler: &OrderReconciler, order: &BybitOrder) {
    let exchange_id = order.exchange_id();
    if reconciler.resolve_local_id(&exchange_id).is_none() {
        let bound = order
            .local_id()
            .is_some_and(|local_id| reconciler.bind(&local_id, &exchange_id).is_ok());
        if !bound {
            if let Err(e) = reconciler.adopt_exchange_id(&exchange_id) {
                tracing::error!(exchange_id = %exchange_id, error = %e, "Failed to adopt order");
                return;
            }
        }
    }
    reconciler.record_push(order.to_update());
}
