//! Identity reconciliation errors.

use thiserror::Error;

use crate::domain::order::{ExchangeOrderId, LocalOrderId};

/// Inconsistent use of order identities.
///
/// These indicate a programming error in the caller; the reconciler refuses
/// the operation instead of overwriting an existing mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The local id was never allocated by this reconciler.
    #[error("local order id {local_id} was never allocated")]
    UnknownLocalId {
        /// Offending local id.
        local_id: LocalOrderId,
    },

    /// The local id is already bound to a different exchange id.
    #[error("local order id {local_id} is bound to {bound}, refusing rebind to {requested}")]
    ConflictingBinding {
        /// Local id being bound.
        local_id: LocalOrderId,
        /// Exchange id it is already bound to.
        bound: ExchangeOrderId,
        /// Exchange id the caller tried to bind.
        requested: ExchangeOrderId,
    },

    /// The exchange id already belongs to a different local id.
    #[error("exchange order id {exchange_id} already belongs to {owner}, refusing bind to {requested}")]
    ExchangeIdInUse {
        /// Exchange id being bound.
        exchange_id: ExchangeOrderId,
        /// Local id that owns it.
        owner: LocalOrderId,
        /// Local id the caller tried to bind.
        requested: LocalOrderId,
    },
}
