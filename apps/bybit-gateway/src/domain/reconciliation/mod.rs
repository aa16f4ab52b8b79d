//! Order Identity Reconciliation
//!
//! Maps local order ids to exchange order ids and absorbs pushes and cancels
//! that arrive before the mapping exists.

mod errors;
mod ports;
mod reconciler;

pub use errors::IdentityError;
pub use ports::{CancelForwarder, OrderListener};
pub use reconciler::{
    BindOutcome, CancelDisposition, FillDisposition, OrderReconciler, PushDisposition,
};
