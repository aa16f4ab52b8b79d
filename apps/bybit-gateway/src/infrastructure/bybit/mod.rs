//! Bybit Adapter
//!
//! Endpoint paths, request builders and response types for the Bybit v2
//! private REST API, wired onto the generic request engine.

pub mod api_types;
pub mod config;
pub mod rest_api;

pub use api_types::{BybitOrder, BybitPosition, envelope_error};
pub use config::BybitServer;
pub use rest_api::BybitRestApi;
