//! Gateway end-to-end tests against a mock Bybit REST server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bybit_gateway::config::{GatewayConfig, load_config_from_string};
use bybit_gateway::infrastructure::rest::{Rejection, Request, RequestError};
use bybit_gateway::{
    BybitGateway, CancelRequest, ExchangeOrderId, GatewayEvents, OrderRequest, OrderSnapshot,
    OrderStatus, OrderUpdate, PositionSnapshot, RequestStatus, Side,
};
use bybit_gateway::domain::reconciliation::{CancelDisposition, PushDisposition};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct Recorder {
    orders: Mutex<Vec<(String, OrderStatus)>>,
    positions: Mutex<Vec<PositionSnapshot>>,
    rejections: Mutex<Vec<Rejection>>,
    exceptions: Mutex<Vec<RequestError>>,
}

impl GatewayEvents for Recorder {
    fn on_order_update(&self, snapshot: &OrderSnapshot) {
        self.orders
            .lock()
            .push((snapshot.local_id.to_string(), snapshot.status));
    }

    fn on_position(&self, position: &PositionSnapshot) {
        self.positions.lock().push(position.clone());
    }

    fn on_request_rejected(&self, rejection: &Rejection, _request: &Request) {
        self.rejections.lock().push(rejection.clone());
    }

    fn on_request_exception(&self, error: &RequestError, _request: &Request) {
        self.exceptions.lock().push(error.clone());
    }
}

fn config(server: &MockServer, timeout_ms: u64) -> GatewayConfig {
    let yaml = format!(
        r"
exchange:
  api_key: test-key
  api_secret: test-secret
  rest_url: {}
engine:
  timeout_ms: {timeout_ms}
orders:
  id_prefix: t
",
        server.uri()
    );
    load_config_from_string(&yaml).unwrap()
}

fn gateway(server: &MockServer, timeout_ms: u64) -> (BybitGateway, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let gateway = BybitGateway::connect(&config(server, timeout_ms), recorder.clone()).unwrap();
    (gateway, recorder)
}

fn order_body(order_id: &str, link_id: &str, status: &str) -> Value {
    json!({
        "ret_code": 0,
        "ret_msg": "OK",
        "result": {
            "order_id": order_id,
            "order_link_id": link_id,
            "symbol": "BTCUSD",
            "side": "Buy",
            "order_type": "Limit",
            "price": "30000",
            "qty": 10,
            "order_status": status,
            "cum_exec_qty": 0,
            "created_at": "2020-10-18T12:00:00.000Z",
            "updated_at": "2020-10-18T12:00:00.000Z"
        }
    })
}

fn limit_order() -> OrderRequest {
    OrderRequest::limit("BTCUSD", Side::Buy, dec!(10), dec!(30000))
}

// =============================================================================
// Placement
// =============================================================================

#[tokio::test]
async fn accepted_order_is_bound_to_exchange_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/private/order/create"))
        .and(body_partial_json(json!({
            "symbol": "BTCUSD",
            "side": "Buy",
            "order_type": "Limit",
            "order_link_id": "t-1",
            "api_key": "test-key",
            "recv_window": 30000
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_body("EX1", "t-1", "New")))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, recorder) = gateway(&server, 5_000);

    let mut submitted = gateway.place_order(limit_order());

    assert_eq!(submitted.local_id.as_str(), "t-1");
    assert_eq!(submitted.handle.wait().await, RequestStatus::Success);
    let snapshot = gateway.get_order(&submitted.local_id).unwrap();
    assert_eq!(snapshot.status, OrderStatus::New);
    assert_eq!(snapshot.exchange_id, Some(ExchangeOrderId::new("EX1")));
    assert_eq!(
        *recorder.orders.lock(),
        vec![
            ("t-1".to_string(), OrderStatus::Submitting),
            ("t-1".to_string(), OrderStatus::New),
        ]
    );
    server.verify().await;
}

#[tokio::test]
async fn refused_order_is_marked_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/private/order/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ret_code": 30031,
            "ret_msg": "oc_diff[1000], new_oc[1000] with ob[0]+AB[0]",
            "result": null
        })))
        .mount(&server)
        .await;
    let (gateway, recorder) = gateway(&server, 5_000);

    let mut submitted = gateway.place_order(limit_order());

    assert_eq!(submitted.handle.wait().await, RequestStatus::Rejected);
    assert_eq!(
        gateway.get_order(&submitted.local_id).unwrap().status,
        OrderStatus::Rejected
    );
    let rejections = recorder.rejections.lock();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].ret_code, Some(30031));
    assert!(gateway.active_orders().is_empty());
}

#[tokio::test]
async fn timed_out_order_keeps_cancel_until_found_on_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/private/order/create"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(order_body("EX1", "t-1", "New"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let mut listing = order_body("EX1", "t-1", "New");
    listing["result"] = json!([listing["result"].clone()]);
    Mock::given(method("GET"))
        .and(path("/v2/private/order"))
        .and(query_param("symbol", "BTCUSD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/private/order/cancel"))
        .and(body_partial_json(json!({"order_id": "EX1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_body("EX1", "t-1", "PendingCancel")))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, recorder) = gateway(&server, 100);

    let mut submitted = gateway.place_order(limit_order());
    let disposition = gateway
        .cancel_order(CancelRequest::new(submitted.local_id.clone(), "BTCUSD"))
        .unwrap();

    assert_eq!(disposition, CancelDisposition::Buffered);
    assert_eq!(submitted.handle.wait().await, RequestStatus::Errored);
    assert!(matches!(
        recorder.exceptions.lock()[0],
        RequestError::Timeout { after_ms: 100 }
    ));
    assert_ne!(
        gateway.get_order(&submitted.local_id).unwrap().status,
        OrderStatus::Rejected
    );

    let exchange_id = ExchangeOrderId::new("EX1");
    let mut cancels_sent = 0;
    for _ in 0..100 {
        cancels_sent = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/v2/private/order/cancel")
            .count();
        let synced = gateway
            .get_order(&submitted.local_id)
            .is_some_and(|snap| snap.status == OrderStatus::New);
        if cancels_sent > 0 && synced {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(cancels_sent, 1);
    assert_eq!(
        gateway.reconciler().resolve_exchange_id(&submitted.local_id),
        Some(exchange_id)
    );
    assert_eq!(gateway.reconciler().pending_cancel_count(), 0);
    assert_eq!(
        gateway.get_order(&submitted.local_id).unwrap().status,
        OrderStatus::New
    );
}

#[tokio::test]
async fn order_that_never_left_is_marked_rejected() {
    let server = MockServer::start().await;
    let (gateway, recorder) = gateway(&server, 5_000);
    gateway.shutdown().await;

    let mut submitted = gateway.place_order(limit_order());

    assert_eq!(submitted.handle.wait().await, RequestStatus::Errored);
    assert_eq!(
        gateway.get_order(&submitted.local_id).unwrap().status,
        OrderStatus::Rejected
    );
    assert_eq!(*recorder.exceptions.lock(), vec![RequestError::ShutDown]);
}

// =============================================================================
// Early cancels and pushes
// =============================================================================

#[tokio::test]
async fn cancel_issued_before_ack_is_sent_with_exchange_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/private/order/create"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(order_body("EX7", "t-1", "New"))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/private/order/cancel"))
        .and(body_partial_json(json!({"order_id": "EX7", "symbol": "BTCUSD"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_body("EX7", "t-1", "PendingCancel")))
        .expect(1)
        .mount(&server)
        .await;
    let (gateway, _) = gateway(&server, 5_000);

    let mut submitted = gateway.place_order(limit_order());
    let disposition = gateway
        .cancel_order(CancelRequest::new(submitted.local_id.clone(), "BTCUSD"))
        .unwrap();

    assert_eq!(disposition, CancelDisposition::Buffered);
    assert_eq!(submitted.handle.wait().await, RequestStatus::Success);
    assert_eq!(gateway.reconciler().pending_cancel_count(), 0);

    gateway.shutdown().await;
    server.verify().await;
}

#[tokio::test]
async fn push_received_before_ack_is_not_overwritten_by_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/private/order/create"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(order_body("EX9", "t-1", "Created"))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let (gateway, recorder) = gateway(&server, 5_000);

    let mut submitted = gateway.place_order(limit_order());
    let pushed = gateway.on_order_push(
        OrderUpdate::status(ExchangeOrderId::new("EX9"), OrderStatus::Filled)
            .with_cum_exec_qty(dec!(10)),
    );

    assert_eq!(pushed, PushDisposition::Buffered);
    assert_eq!(
        gateway.get_order(&submitted.local_id).unwrap().status,
        OrderStatus::Submitting
    );

    submitted.handle.wait().await;

    let snapshot = gateway.get_order(&submitted.local_id).unwrap();
    assert_eq!(snapshot.status, OrderStatus::Filled);
    assert_eq!(snapshot.filled_qty, dec!(10));
    assert_eq!(
        recorder.orders.lock().last(),
        Some(&("t-1".to_string(), OrderStatus::Filled))
    );
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn position_query_reports_each_position() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/private/position/list"))
        .and(query_param("api_key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ret_code": 0,
            "ret_msg": "OK",
            "result": [
                {"data": {"symbol": "BTCUSD", "side": "Buy", "size": 100, "entry_price": "30000", "unrealised_pnl": 0.01}, "is_valid": true},
                {"data": {"symbol": "ETHUSD", "side": "None", "size": 0, "entry_price": "0", "unrealised_pnl": 0}, "is_valid": true}
            ]
        })))
        .mount(&server)
        .await;
    let (gateway, recorder) = gateway(&server, 5_000);

    assert_eq!(gateway.query_positions(None).wait().await, RequestStatus::Success);

    let positions = recorder.positions.lock();
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[0].symbol, "BTCUSD");
    assert_eq!(positions[0].side, Some(Side::Buy));
    assert_eq!(positions[0].size, dec!(100));
    assert_eq!(positions[1].side, None);
}

#[tokio::test]
async fn active_order_query_adopts_foreign_orders() {
    let server = MockServer::start().await;
    let mut listing = order_body("EX-OLD", "previous-run-3", "New");
    listing["result"] = json!([listing["result"].clone()]);
    Mock::given(method("GET"))
        .and(path("/v2/private/order"))
        .and(query_param("symbol", "BTCUSD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing))
        .mount(&server)
        .await;
    let (gateway, _) = gateway(&server, 5_000);

    assert_eq!(
        gateway.query_active_orders("BTCUSD").wait().await,
        RequestStatus::Success
    );

    let reconciler = gateway.reconciler();
    let local = reconciler
        .resolve_local_id(&ExchangeOrderId::new("EX-OLD"))
        .unwrap();
    assert!(local.as_str().starts_with("t-"));
    assert_eq!(gateway.get_order(&local).unwrap().status, OrderStatus::New);
    assert_eq!(gateway.active_orders().len(), 1);
}
