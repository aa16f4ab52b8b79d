// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Bybit Gateway - Rust Core Library
//!
//! Connectivity layer between trading strategies and the Bybit REST API.
//!
//! # Architecture
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: order identifiers, snapshots and the identity reconciler
//!   - `order`: local/exchange ids, requests, updates, snapshots
//!   - `reconciliation`: id binding, buffered pushes/cancels, queued fills
//!
//! - **Application**: the gateway facade and its event port
//!
//! - **Infrastructure**: adapters
//!   - `rest`: HMAC signer, session pool, concurrent request engine
//!   - `bybit`: endpoints, request builders, response types
//!   - `metrics`: request and buffer gauges
//!
//! # Data flow
//!
//! A strategy places an order; the facade allocates a local id, the engine
//! signs and sends the create request, and the response binds the exchange
//! id. Pushes and cancels that reference an order before that binding are
//! held by the reconciler and drained in order once it exists.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Order identity and state.
pub mod domain;

/// Application layer - Gateway facade and ports.
pub mod application;

/// Infrastructure layer - REST engine and Bybit adapter.
pub mod infrastructure;

// =============================================================================
// Cross-cutting
// =============================================================================

/// YAML configuration loading.
pub mod config;

/// Top-level error type.
pub mod error;

/// Tracing subscriber setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use application::{BybitGateway, GatewayEvents, LoggingEvents, SubmittedOrder};
pub use config::{GatewayConfig, load_config};
pub use domain::order::{
    CancelRequest, ExchangeOrderId, FillUpdate, LocalOrderId, OrderRequest, OrderSnapshot,
    OrderStatus, OrderType, OrderUpdate, PositionSnapshot, Side, TimeInForce,
};
pub use domain::reconciliation::{IdentityError, OrderReconciler};
pub use error::GatewayError;
pub use infrastructure::bybit::BybitServer;
pub use infrastructure::rest::{RequestEngine, RequestError, RequestStatus, Signer};
