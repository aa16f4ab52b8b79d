//! Infrastructure Layer
//!
//! Adapters for external systems: the signed REST engine, the Bybit API on
//! top of it, and metrics.

pub mod bybit;
pub mod metrics;
pub mod rest;
