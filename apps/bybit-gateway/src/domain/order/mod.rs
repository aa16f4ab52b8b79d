//! Order Domain
//!
//! Identifiers, value objects, requests and snapshots shared by the
//! reconciler, the facade and the Bybit adapter.

pub mod identifiers;
pub mod requests;
pub mod snapshot;
pub mod value_objects;

pub use identifiers::{ExchangeOrderId, LocalIdAllocator, LocalOrderId};
pub use requests::{CancelRequest, OrderRequest, PositionSnapshot};
pub use snapshot::{FillUpdate, OrderSnapshot, OrderUpdate};
pub use value_objects::{OrderStatus, OrderType, Side, TimeInForce};
