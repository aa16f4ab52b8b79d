//! Bybit inverse-perpetual private REST endpoints.
//!
//! Builders here only shape requests; callers attach their own handlers and
//! submit through [`BybitRestApi::send`].

use std::sync::Arc;

use tokio::runtime::{Handle, TryCurrentError};

use crate::domain::order::{CancelRequest, ExchangeOrderId, LocalOrderId, OrderRequest, OrderType};
use crate::domain::reconciliation::CancelForwarder;
use crate::infrastructure::rest::{
    EngineOptions, Request, RequestEngine, RequestFallback, RequestHandle,
    SessionFactory, Signer,
};

use super::api_types::envelope_error;

/// Place an order.
pub const ORDER_CREATE: &str = "/v2/private/order/create";
/// Cancel an order.
pub const ORDER_CANCEL: &str = "/v2/private/order/cancel";
/// Query active orders.
pub const ORDER_QUERY: &str = "/v2/private/order";
/// List positions.
pub const POSITION_LIST: &str = "/v2/private/position/list";

/// Order-create request. `local_id` travels as `order_link_id`.
#[must_use]
pub fn create_order_request(local_id: &LocalOrderId, order: &OrderRequest) -> Request {
    let mut request = Request::post(ORDER_CREATE)
        .data("side", order.side.as_str())
        .data("symbol", order.symbol.as_str())
        .data("order_type", order.order_type.as_str())
        .data("qty", order.qty)
        .data("time_in_force", order.time_in_force.as_str())
        .data("order_link_id", local_id.as_str());
    if order.order_type == OrderType::Limit {
        if let Some(price) = order.price {
            request = request.data("price", price);
        }
    }
    if order.reduce_only {
        request = request.data("reduce_only", true);
    }
    request
}

/// Cancel request for an order whose exchange id is known.
#[must_use]
pub fn cancel_order_request(exchange_id: &ExchangeOrderId, cancel: &CancelRequest) -> Request {
    Request::post(ORDER_CANCEL)
        .data("symbol", cancel.symbol.as_str())
        .data("order_id", exchange_id.as_str())
}

/// Active-order query for one symbol.
#[must_use]
pub fn active_orders_request(symbol: &str) -> Request {
    Request::get(ORDER_QUERY).param("symbol", symbol)
}

/// Position list, for one symbol or all of them.
#[must_use]
pub fn positions_request(symbol: Option<&str>) -> Request {
    let request = Request::get(POSITION_LIST);
    match symbol {
        Some(symbol) => request.param("symbol", symbol),
        None => request,
    }
}

/// Bybit REST client on top of the request engine.
#[derive(Debug, Clone)]
pub struct BybitRestApi {
    engine: RequestEngine,
}

impl BybitRestApi {
    /// Wrap an existing engine.
    #[must_use]
    pub const fn new(engine: RequestEngine) -> Self {
        Self { engine }
    }

    /// Build an engine for `base_url` that treats a non-zero `ret_code` as a
    /// rejection. Without `runtime` this must run inside a Tokio runtime.
    pub fn connect(
        base_url: &str,
        signer: Signer,
        options: EngineOptions,
        fallback: Arc<dyn RequestFallback>,
        factory: Option<Arc<dyn SessionFactory>>,
        runtime: Option<Handle>,
    ) -> Result<Self, TryCurrentError> {
        let mut builder = RequestEngine::builder(base_url, signer)
            .options(options)
            .fallback(fallback)
            .envelope_check(envelope_error);
        if let Some(factory) = factory {
            builder = builder.session_factory(factory);
        }
        if let Some(runtime) = runtime {
            builder = builder.runtime(runtime);
        }
        builder.build().map(Self::new)
    }

    /// The underlying engine.
    pub const fn engine(&self) -> &RequestEngine {
        &self.engine
    }

    /// Submit a request.
    pub fn send(&self, request: Request) -> RequestHandle {
        self.engine.submit(request)
    }

    /// Stop the engine and wait for outstanding requests.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

impl CancelForwarder for BybitRestApi {
    fn forward_cancel(&self, exchange_id: &ExchangeOrderId, request: &CancelRequest) {
        let local_id = request.local_id.clone();
        let call = cancel_order_request(exchange_id, request)
            .on_success(move |_, req| {
                tracing::debug!(local_id = %local_id, path = req.path(), "Cancel accepted");
            })
            .on_exception(|error, req| {
                tracing::error!(error = %error, "Cancel failed\n{req}");
            });
        self.send(call);
    }
}
