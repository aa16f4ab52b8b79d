//! Order Identity Reconciler Integration Tests
//!
//! Early cancels and pushes, binding order, and the id bijection under
//! sequential and concurrent use.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;

use bybit_gateway::domain::order::{
    CancelRequest, ExchangeOrderId, LocalIdAllocator, LocalOrderId, OrderSnapshot, OrderStatus,
    OrderUpdate,
};
use bybit_gateway::domain::reconciliation::{
    CancelDisposition, CancelForwarder, IdentityError, OrderListener, OrderReconciler,
    PushDisposition,
};

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Cancel {
        local_id: LocalOrderId,
        exchange_id: ExchangeOrderId,
    },
    Order {
        local_id: LocalOrderId,
        status: OrderStatus,
    },
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn cancels(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Cancel { .. }))
            .count()
    }
}

impl CancelForwarder for Recorder {
    fn forward_cancel(&self, exchange_id: &ExchangeOrderId, request: &CancelRequest) {
        self.events.lock().push(Event::Cancel {
            local_id: request.local_id.clone(),
            exchange_id: exchange_id.clone(),
        });
    }
}

impl OrderListener for Recorder {
    fn on_order_update(&self, snapshot: &OrderSnapshot) {
        self.events.lock().push(Event::Order {
            local_id: snapshot.local_id.clone(),
            status: snapshot.status,
        });
    }
}

fn setup() -> (Arc<OrderReconciler>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let reconciler = OrderReconciler::new(
        LocalIdAllocator::new("201018120000"),
        recorder.clone(),
        recorder.clone(),
    );
    (Arc::new(reconciler), recorder)
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn cancel_before_bind_is_held_then_forwarded_with_exchange_id() {
    let (reconciler, recorder) = setup();
    let l1 = reconciler.new_local_id();

    let disposition = reconciler
        .request_cancel(CancelRequest::new(l1.clone(), "BTCUSD"))
        .unwrap();

    assert_eq!(disposition, CancelDisposition::Buffered);
    assert_eq!(recorder.cancels(), 0);
    assert_eq!(reconciler.pending_cancel_count(), 1);

    let outcome = reconciler.bind(&l1, &ExchangeOrderId::new("EX100")).unwrap();

    assert!(outcome.cancel_forwarded);
    assert_eq!(
        recorder.events(),
        vec![Event::Cancel {
            local_id: l1,
            exchange_id: ExchangeOrderId::new("EX100"),
        }]
    );
    assert_eq!(reconciler.pending_cancel_count(), 0);
}

#[test]
fn push_before_bind_is_invisible_until_bound() {
    let (reconciler, _) = setup();
    let l2 = reconciler.new_local_id();
    let ex = ExchangeOrderId::new("EX200");

    let disposition = reconciler.record_push(OrderUpdate::status(ex.clone(), OrderStatus::Filled));

    assert_eq!(disposition, PushDisposition::Buffered);
    assert!(reconciler.get_snapshot(&l2).is_none());
    assert!(reconciler.active_orders().is_empty());

    reconciler.bind(&l2, &ex).unwrap();

    assert_eq!(reconciler.get_snapshot(&l2).unwrap().status, OrderStatus::Filled);
    assert_eq!(reconciler.pending_push_count(), 0);
}

#[test]
fn cancel_is_forwarded_before_buffered_push_is_applied() {
    let (reconciler, recorder) = setup();
    let local = reconciler.new_local_id();
    let ex = ExchangeOrderId::new("EX300");

    reconciler.record_push(OrderUpdate::status(ex.clone(), OrderStatus::PartiallyFilled));
    reconciler
        .request_cancel(CancelRequest::new(local.clone(), "BTCUSD"))
        .unwrap();
    reconciler.bind(&local, &ex).unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            Event::Cancel {
                local_id: local.clone(),
                exchange_id: ex,
            },
            Event::Order {
                local_id: local,
                status: OrderStatus::PartiallyFilled,
            },
        ]
    );
}

#[test]
fn second_buffered_push_overwrites_first() {
    let (reconciler, recorder) = setup();
    let local = reconciler.new_local_id();
    let ex = ExchangeOrderId::new("EX400");

    reconciler.record_push(OrderUpdate::status(ex.clone(), OrderStatus::New));
    reconciler.record_push(OrderUpdate::status(ex.clone(), OrderStatus::PartiallyFilled));
    reconciler.bind(&local, &ex).unwrap();

    assert_eq!(
        recorder.events(),
        vec![Event::Order {
            local_id: local,
            status: OrderStatus::PartiallyFilled,
        }]
    );
}

#[test]
fn bound_cancel_is_forwarded_immediately() {
    let (reconciler, recorder) = setup();
    let local = reconciler.new_local_id();
    reconciler.bind(&local, &ExchangeOrderId::new("EX500")).unwrap();

    let disposition = reconciler
        .request_cancel(CancelRequest::new(local, "BTCUSD"))
        .unwrap();

    assert_eq!(disposition, CancelDisposition::Forwarded);
    assert_eq!(recorder.cancels(), 1);
}

#[test]
fn cancel_for_foreign_local_id_is_refused() {
    let (reconciler, recorder) = setup();

    let err = reconciler
        .request_cancel(CancelRequest::new(LocalOrderId::new("someone-else-1"), "BTCUSD"))
        .unwrap_err();

    assert!(matches!(err, IdentityError::UnknownLocalId { .. }));
    assert_eq!(reconciler.pending_cancel_count(), 0);
    assert!(recorder.events().is_empty());
}

#[test]
fn failed_bind_leaves_buffers_untouched() {
    let (reconciler, recorder) = setup();
    let first = reconciler.new_local_id();
    let second = reconciler.new_local_id();
    reconciler.bind(&first, &ExchangeOrderId::new("EX1")).unwrap();
    reconciler
        .request_cancel(CancelRequest::new(second.clone(), "BTCUSD"))
        .unwrap();

    let err = reconciler
        .bind(&second, &ExchangeOrderId::new("EX1"))
        .unwrap_err();

    assert!(matches!(err, IdentityError::ExchangeIdInUse { .. }));
    assert_eq!(reconciler.pending_cancel_count(), 1);
    assert_eq!(recorder.cancels(), 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn concurrent_push_cancel_bind_each_cancel_forwarded_once() {
    const ORDERS: usize = 64;
    let (reconciler, recorder) = setup();
    let locals: Vec<LocalOrderId> = (0..ORDERS).map(|_| reconciler.new_local_id()).collect();
    let exchange = |i: usize| ExchangeOrderId::new(format!("EX-{i}"));

    let mut workers = Vec::new();
    {
        let reconciler = Arc::clone(&reconciler);
        let locals = locals.clone();
        workers.push(thread::spawn(move || {
            for local in locals {
                reconciler
                    .request_cancel(CancelRequest::new(local, "BTCUSD"))
                    .unwrap();
            }
        }));
    }
    {
        let reconciler = Arc::clone(&reconciler);
        workers.push(thread::spawn(move || {
            for i in 0..ORDERS {
                reconciler.record_push(OrderUpdate::status(exchange(i), OrderStatus::New));
            }
        }));
    }
    {
        let reconciler = Arc::clone(&reconciler);
        let locals = locals.clone();
        workers.push(thread::spawn(move || {
            for (i, local) in locals.iter().enumerate() {
                reconciler.bind(local, &exchange(i)).unwrap();
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(recorder.cancels(), ORDERS);
    assert_eq!(reconciler.pending_cancel_count(), 0);
    assert_eq!(reconciler.pending_push_count(), 0);
    for (i, local) in locals.iter().enumerate() {
        assert_eq!(reconciler.resolve_exchange_id(local), Some(exchange(i)));
        assert_eq!(reconciler.get_snapshot(local).unwrap().status, OrderStatus::New);
    }

    let forwarded: HashSet<ExchangeOrderId> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Cancel { exchange_id, .. } => Some(exchange_id),
            Event::Order { .. } => None,
        })
        .collect();
    assert_eq!(forwarded.len(), ORDERS);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn bound_pairs_form_a_bijection(
        binds in prop::collection::vec((0usize..16, 0usize..16), 1..64)
    ) {
        let (reconciler, _) = setup();
        let locals: Vec<LocalOrderId> = (0..16).map(|_| reconciler.new_local_id()).collect();

        for (l, e) in binds {
            let _ = reconciler.bind(&locals[l], &ExchangeOrderId::new(format!("EX{e}")));
        }

        for local in &locals {
            if let Some(exchange) = reconciler.resolve_exchange_id(local) {
                let owner = reconciler.resolve_local_id(&exchange);
                prop_assert_eq!(owner.as_ref(), Some(local));
            }
        }
        for e in 0..16 {
            let exchange = ExchangeOrderId::new(format!("EX{e}"));
            if let Some(local) = reconciler.resolve_local_id(&exchange) {
                prop_assert_eq!(reconciler.resolve_exchange_id(&local), Some(exchange));
            }
        }
    }

    #[test]
    fn buffered_push_is_hidden_until_bind(
        statuses in prop::collection::vec(
            prop::sample::select(vec![
                OrderStatus::New,
                OrderStatus::PartiallyFilled,
                OrderStatus::Filled,
                OrderStatus::Cancelled,
            ]),
            1..8,
        )
    ) {
        let (reconciler, _) = setup();
        let local = reconciler.new_local_id();
        let ex = ExchangeOrderId::new("EXP");

        for status in &statuses {
            reconciler.record_push(OrderUpdate::status(ex.clone(), *status));
            prop_assert!(reconciler.get_snapshot(&local).is_none());
        }
        reconciler.bind(&local, &ex).unwrap();

        prop_assert_eq!(reconciler.get_snapshot(&local).unwrap().status, *statuses.last().unwrap());
    }
}
