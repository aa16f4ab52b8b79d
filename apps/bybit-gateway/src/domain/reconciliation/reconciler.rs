//! Local/exchange order identity reconciler.
//!
//! Bybit only reveals its `order_id` in the response to an order-create call,
//! while pushes and strategy cancels may reference an order before that
//! response arrives. The reconciler owns both identity maps and two buffers:
//!
//! - pending pushes, keyed by exchange id, latest status wins
//! - pending cancels, keyed by local id
//!
//! plus a fill queue keyed by exchange id that keeps every execution, since a
//! latest-wins slot would lose partial fills.
//!
//! # Binding order
//!
//! [`OrderReconciler::bind`] installs both directions of the mapping, then
//! forwards a buffered cancel, then applies a buffered push, then delivers
//! queued fills. A cancel that reached the gateway before the acknowledgement
//! is therefore sent before any state the exchange reported afterwards is
//! applied locally.
//!
//! # Locking
//!
//! One mutex guards every map, so `bind`, `record_push` and `request_cancel`
//! are linearizable. Cancels are forwarded inside the critical section (the
//! forwarder only enqueues). Listener notifications are collected and sent
//! after the lock is released so listeners may call back into the reconciler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::order::{
    CancelRequest, ExchangeOrderId, FillUpdate, LocalIdAllocator, LocalOrderId, OrderSnapshot,
    OrderUpdate,
};

use super::errors::IdentityError;
use super::ports::{CancelForwarder, OrderListener};

/// What happened to a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    /// Exchange id known; cancel sent to the transport.
    Forwarded,
    /// Exchange id unknown; cancel held until `bind`.
    Buffered,
}

/// What happened to an order push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDisposition {
    /// Applied to the snapshot and published.
    Applied,
    /// Held until the exchange id is bound.
    Buffered,
}

/// What happened to a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDisposition {
    /// Attributed to a local order and published.
    Delivered,
    /// Queued until the exchange id is bound.
    Queued,
}

/// Side effects of a successful [`OrderReconciler::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindOutcome {
    /// False when the same pair was already bound.
    pub newly_bound: bool,
    /// A buffered cancel was forwarded.
    pub cancel_forwarded: bool,
    /// A buffered push was applied.
    pub push_applied: bool,
    /// The create acknowledgement was applied.
    pub acknowledged: bool,
    /// Number of queued fills delivered.
    pub fills_delivered: usize,
}

#[derive(Debug, Default)]
struct ReconcilerState {
    local_to_exchange: HashMap<LocalOrderId, ExchangeOrderId>,
    exchange_to_local: HashMap<ExchangeOrderId, LocalOrderId>,
    pending_pushes: HashMap<ExchangeOrderId, OrderUpdate>,
    pending_cancels: HashMap<LocalOrderId, CancelRequest>,
    pending_fills: HashMap<ExchangeOrderId, Vec<FillUpdate>>,
    snapshots: HashMap<LocalOrderId, OrderSnapshot>,
}

impl ReconcilerState {
    fn apply_update(&mut self, local_id: &LocalOrderId, update: &OrderUpdate) -> OrderSnapshot {
        let snapshot = self
            .snapshots
            .entry(local_id.clone())
            .and_modify(|snap| snap.apply(update))
            .or_insert_with(|| OrderSnapshot::from_update(local_id.clone(), update));
        snapshot.clone()
    }
}

enum Notification {
    Order(OrderSnapshot),
    Fill(LocalOrderId, FillUpdate),
}

/// Owns the local/exchange id mapping and everything waiting on it.
pub struct OrderReconciler {
    ids: LocalIdAllocator,
    state: Mutex<ReconcilerState>,
    forwarder: Arc<dyn CancelForwarder>,
    listener: Arc<dyn OrderListener>,
}

impl std::fmt::Debug for OrderReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderReconciler")
            .field("prefix", &self.ids.prefix())
            .field("allocated", &self.ids.allocated())
            .finish_non_exhaustive()
    }
}

impl OrderReconciler {
    /// Create a reconciler allocating ids from `ids`.
    #[must_use]
    pub fn new(
        ids: LocalIdAllocator,
        forwarder: Arc<dyn CancelForwarder>,
        listener: Arc<dyn OrderListener>,
    ) -> Self {
        Self {
            ids,
            state: Mutex::new(ReconcilerState::default()),
            forwarder,
            listener,
        }
    }

    /// Allocate a fresh local id. Lock-free.
    pub fn new_local_id(&self) -> LocalOrderId {
        self.ids.allocate()
    }

    /// Record the initial snapshot of an order this process is placing.
    ///
    /// An existing snapshot for the same local id is left untouched.
    pub fn track_order(&self, snapshot: OrderSnapshot) {
        let mut state = self.state.lock();
        state
            .snapshots
            .entry(snapshot.local_id.clone())
            .or_insert(snapshot);
    }

    /// Bind `local_id` to `exchange_id` and drain whatever waited on either.
    ///
    /// Binding an identical pair twice is a no-op. Binding an unallocated
    /// local id, rebinding a local id to another exchange id, or reusing an
    /// exchange id for another local id is refused.
    pub fn bind(
        &self,
        local_id: &LocalOrderId,
        exchange_id: &ExchangeOrderId,
    ) -> Result<BindOutcome, IdentityError> {
        if !self.ids.was_issued(local_id) {
            tracing::warn!(local_id = %local_id, exchange_id = %exchange_id, "Bind for unallocated local id");
            return Err(IdentityError::UnknownLocalId {
                local_id: local_id.clone(),
            });
        }

        let mut notifications = Vec::new();
        let outcome = {
            let mut state = self.state.lock();
            self.bind_locked(&mut state, local_id, exchange_id, None, &mut notifications)
        };
        self.publish(notifications);
        outcome
    }

    /// Bind `local_id` to the exchange id carried by a create response and
    /// apply that response as the order's first exchange state.
    ///
    /// The acknowledgement is applied after a buffered cancel is forwarded
    /// and before a buffered push. If the pair was already bound the
    /// acknowledgement is stale and is dropped.
    pub fn acknowledge(
        &self,
        local_id: &LocalOrderId,
        ack: &OrderUpdate,
    ) -> Result<BindOutcome, IdentityError> {
        if !self.ids.was_issued(local_id) {
            tracing::error!(local_id = %local_id, exchange_id = %ack.exchange_id, "Acknowledgement for unallocated local id");
            return Err(IdentityError::UnknownLocalId {
                local_id: local_id.clone(),
            });
        }

        let mut notifications = Vec::new();
        let outcome = {
            let mut state = self.state.lock();
            self.bind_locked(
                &mut state,
                local_id,
                &ack.exchange_id,
                Some(ack),
                &mut notifications,
            )
        };
        self.publish(notifications);
        outcome
    }

    /// Local id for an exchange id, binding a freshly allocated one if the
    /// order was not placed by this process.
    pub fn adopt_exchange_id(
        &self,
        exchange_id: &ExchangeOrderId,
    ) -> Result<LocalOrderId, IdentityError> {
        let mut notifications = Vec::new();
        let result = {
            let mut state = self.state.lock();
            if let Some(local_id) = state.exchange_to_local.get(exchange_id) {
                Ok(local_id.clone())
            } else {
                let local_id = self.ids.allocate();
                self.bind_locked(&mut state, &local_id, exchange_id, None, &mut notifications)
                    .map(|_| local_id)
            }
        };
        self.publish(notifications);
        if let Ok(local_id) = &result {
            tracing::debug!(local_id = %local_id, exchange_id = %exchange_id, "Exchange order adopted");
        }
        result
    }

    /// Exchange id bound to `local_id`, if any.
    pub fn resolve_exchange_id(&self, local_id: &LocalOrderId) -> Option<ExchangeOrderId> {
        self.state.lock().local_to_exchange.get(local_id).cloned()
    }

    /// Local id bound to `exchange_id`, if any.
    pub fn resolve_local_id(&self, exchange_id: &ExchangeOrderId) -> Option<LocalOrderId> {
        self.state.lock().exchange_to_local.get(exchange_id).cloned()
    }

    /// Apply an order push, or buffer it if its exchange id is not bound yet.
    ///
    /// Only the latest buffered push per exchange id is kept; an earlier one
    /// is overwritten. That is acceptable for status snapshots, which carry
    /// the full order state. Per-execution accounting goes through
    /// [`record_fill`](Self::record_fill) instead.
    pub fn record_push(&self, update: OrderUpdate) -> PushDisposition {
        let snapshot = {
            let mut state = self.state.lock();
            match state.exchange_to_local.get(&update.exchange_id).cloned() {
                Some(local_id) => state.apply_update(&local_id, &update),
                None => {
                    let exchange_id = update.exchange_id.clone();
                    if state.pending_pushes.insert(exchange_id.clone(), update).is_some() {
                        tracing::debug!(exchange_id = %exchange_id, "Replaced buffered push for unbound order");
                    } else {
                        tracing::debug!(exchange_id = %exchange_id, "Buffered push for unbound order");
                    }
                    return PushDisposition::Buffered;
                }
            }
        };
        self.listener.on_order_update(&snapshot);
        PushDisposition::Applied
    }

    /// Deliver a fill, or queue it if its exchange id is not bound yet.
    pub fn record_fill(&self, fill: FillUpdate) -> FillDisposition {
        let local_id = {
            let mut state = self.state.lock();
            match state.exchange_to_local.get(&fill.exchange_id).cloned() {
                Some(local_id) => local_id,
                None => {
                    tracing::debug!(exchange_id = %fill.exchange_id, exec_id = %fill.exec_id, "Queued fill for unbound order");
                    state
                        .pending_fills
                        .entry(fill.exchange_id.clone())
                        .or_default()
                        .push(fill);
                    return FillDisposition::Queued;
                }
            }
        };
        self.listener.on_fill(&local_id, &fill);
        FillDisposition::Delivered
    }

    /// Forward a cancel if the order's exchange id is known, else hold it
    /// until [`bind`](Self::bind).
    pub fn request_cancel(&self, request: CancelRequest) -> Result<CancelDisposition, IdentityError> {
        if !self.ids.was_issued(&request.local_id) {
            return Err(IdentityError::UnknownLocalId {
                local_id: request.local_id,
            });
        }

        let mut state = self.state.lock();
        if let Some(exchange_id) = state.local_to_exchange.get(&request.local_id) {
            tracing::info!(local_id = %request.local_id, exchange_id = %exchange_id, "Forwarding cancel");
            self.forwarder.forward_cancel(exchange_id, &request);
            return Ok(CancelDisposition::Forwarded);
        }

        tracing::info!(local_id = %request.local_id, "Exchange id unknown, cancel buffered");
        state.pending_cancels.insert(request.local_id.clone(), request);
        Ok(CancelDisposition::Buffered)
    }

    /// Mark an order rejected after the exchange refused its placement, and
    /// publish it. Only for definite refusals: the buffered cancel is dropped.
    ///
    /// Returns `None` for an untracked local id, or one already bound to an
    /// exchange id (the exchange holds the order, so it is not rejected).
    pub fn reject_order(&self, local_id: &LocalOrderId) -> Option<OrderSnapshot> {
        let snapshot = {
            let mut state = self.state.lock();
            if let Some(exchange_id) = state.local_to_exchange.get(local_id) {
                tracing::warn!(local_id = %local_id, exchange_id = %exchange_id, "Ignoring rejection of a bound order");
                return None;
            }
            let cancel = state.pending_cancels.remove(local_id);
            if cancel.is_some() {
                tracing::debug!(local_id = %local_id, "Dropped buffered cancel for rejected order");
            }
            let snap = state.snapshots.get_mut(local_id)?;
            snap.mark_rejected();
            snap.clone()
        };
        self.listener.on_order_update(&snapshot);
        Some(snapshot)
    }

    /// Copy of the last known state of an order.
    pub fn get_snapshot(&self, local_id: &LocalOrderId) -> Option<OrderSnapshot> {
        self.state.lock().snapshots.get(local_id).cloned()
    }

    /// Copies of every snapshot whose order is still active.
    pub fn active_orders(&self) -> Vec<OrderSnapshot> {
        self.state
            .lock()
            .snapshots
            .values()
            .filter(|snap| snap.is_active())
            .cloned()
            .collect()
    }

    /// Number of pushes waiting for a binding.
    pub fn pending_push_count(&self) -> usize {
        self.state.lock().pending_pushes.len()
    }

    /// Number of cancels waiting for a binding.
    pub fn pending_cancel_count(&self) -> usize {
        self.state.lock().pending_cancels.len()
    }

    fn bind_locked(
        &self,
        state: &mut ReconcilerState,
        local_id: &LocalOrderId,
        exchange_id: &ExchangeOrderId,
        ack: Option<&OrderUpdate>,
        notifications: &mut Vec<Notification>,
    ) -> Result<BindOutcome, IdentityError> {
        if let Some(bound) = state.local_to_exchange.get(local_id) {
            if bound == exchange_id {
                return Ok(BindOutcome::default());
            }
            tracing::error!(local_id = %local_id, bound = %bound, requested = %exchange_id, "Conflicting bind refused");
            return Err(IdentityError::ConflictingBinding {
                local_id: local_id.clone(),
                bound: bound.clone(),
                requested: exchange_id.clone(),
            });
        }
        if let Some(owner) = state.exchange_to_local.get(exchange_id) {
            tracing::error!(exchange_id = %exchange_id, owner = %owner, requested = %local_id, "Exchange id already bound");
            return Err(IdentityError::ExchangeIdInUse {
                exchange_id: exchange_id.clone(),
                owner: owner.clone(),
                requested: local_id.clone(),
            });
        }

        state
            .local_to_exchange
            .insert(local_id.clone(), exchange_id.clone());
        state
            .exchange_to_local
            .insert(exchange_id.clone(), local_id.clone());
        if let Some(snap) = state.snapshots.get_mut(local_id) {
            snap.exchange_id = Some(exchange_id.clone());
        }

        let mut outcome = BindOutcome {
            newly_bound: true,
            ..BindOutcome::default()
        };

        if let Some(cancel) = state.pending_cancels.remove(local_id) {
            self.forwarder.forward_cancel(exchange_id, &cancel);
            outcome.cancel_forwarded = true;
        }

        if let Some(ack) = ack {
            let snapshot = state.apply_update(local_id, ack);
            outcome.acknowledged = true;
            if !state.pending_pushes.contains_key(exchange_id) {
                notifications.push(Notification::Order(snapshot));
            }
        }

        if let Some(update) = state.pending_pushes.remove(exchange_id) {
            notifications.push(Notification::Order(state.apply_update(local_id, &update)));
            outcome.push_applied = true;
        }

        if let Some(fills) = state.pending_fills.remove(exchange_id) {
            outcome.fills_delivered = fills.len();
            notifications.extend(
                fills
                    .into_iter()
                    .map(|fill| Notification::Fill(local_id.clone(), fill)),
            );
        }

        tracing::info!(
            local_id = %local_id,
            exchange_id = %exchange_id,
            cancel_forwarded = outcome.cancel_forwarded,
            push_applied = outcome.push_applied,
            acknowledged = outcome.acknowledged,
            fills_delivered = outcome.fills_delivered,
            "Order id bound"
        );

        Ok(outcome)
    }

    fn publish(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::Order(snapshot) => self.listener.on_order_update(&snapshot),
                Notification::Fill(local_id, fill) => self.listener.on_fill(&local_id, &fill),
            }
        }
    }
}
