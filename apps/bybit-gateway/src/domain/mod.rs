//! Domain Layer
//!
//! Order identities, snapshots and the reconciler that keeps the two id
//! spaces consistent. No transport or exchange wire types live here.
//!
//! # Bounded Contexts
//!
//! - [`order`]: Identifiers, value objects, requests and snapshots
//! - [`reconciliation`]: Local/exchange id binding and early-event buffering

pub mod order;
pub mod reconciliation;
