//! Request engine error types.

use thiserror::Error;

/// Failure to produce a request signature.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// No API key configured.
    #[error("API key is empty")]
    MissingApiKey,

    /// No API secret configured.
    #[error("API secret is empty")]
    MissingSecret,

    /// The MAC could not be keyed with the secret.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Failure inside the HTTP transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A session could not be created.
    #[error("Failed to create HTTP session: {0}")]
    Session(String),

    /// The request could not be sent or no response arrived.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The response body could not be read.
    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Any failure that routes a request to its exception handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Signing failed.
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    /// Transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response within the per-call timeout.
    #[error("Request timed out after {after_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        after_ms: u64,
    },

    /// A 2xx body (or streamed line) was not valid JSON.
    #[error("JSON parsing error: {0}")]
    Decode(String),

    /// Too many requests outstanding; the request was shed.
    #[error("Engine overloaded: {limit} requests already outstanding")]
    Overloaded {
        /// Configured outstanding-request bound.
        limit: usize,
    },

    /// The engine no longer accepts requests.
    #[error("Request engine is shut down")]
    ShutDown,
}

impl RequestError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Signing(_) => "signing",
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Decode(_) => "decode",
            Self::Overloaded { .. } => "overloaded",
            Self::ShutDown => "shut_down",
        }
    }

    /// False only when the request certainly never left the process, so the
    /// exchange cannot have acted on it.
    #[must_use]
    pub const fn may_have_been_sent(&self) -> bool {
        !matches!(
            self,
            Self::Signing(_)
                | Self::Overloaded { .. }
                | Self::ShutDown
                | Self::Transport(TransportError::Session(_))
        )
    }
}
