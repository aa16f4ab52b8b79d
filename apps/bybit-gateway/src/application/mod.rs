//! Application Layer
//!
//! The gateway facade and the event port it reports through.

pub mod gateway;
pub mod ports;

pub use gateway::{BybitGateway, SubmittedOrder};
pub use ports::{EventsBridge, GatewayEvents, LoggingEvents};
