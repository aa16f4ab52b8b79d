//! Top-level gateway errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::reconciliation::IdentityError;
use crate::infrastructure::rest::SigningError;

/// Errors surfaced while building or operating the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Credentials were rejected by the signer.
    #[error("Invalid credentials: {0}")]
    Signing(#[from] SigningError),

    /// No Tokio runtime to run requests on.
    #[error("No Tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// An order identity operation was refused.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
