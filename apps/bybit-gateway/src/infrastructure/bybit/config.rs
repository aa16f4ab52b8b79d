//! Bybit server selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Production REST host.
pub const REST_HOST: &str = "https://api.bybit.com";
/// Testnet REST host.
pub const TESTNET_REST_HOST: &str = "https://api-testnet.bybit.com";

/// Bybit environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BybitServer {
    /// Live trading.
    Real,
    /// Testnet.
    #[default]
    Testnet,
}

impl BybitServer {
    /// REST base URL.
    #[must_use]
    pub const fn rest_base_url(&self) -> &'static str {
        match self {
            Self::Real => REST_HOST,
            Self::Testnet => TESTNET_REST_HOST,
        }
    }

    /// Check if this is live trading.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Real)
    }
}

impl fmt::Display for BybitServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real => write!(f, "REAL"),
            Self::Testnet => write!(f, "TESTNET"),
        }
    }
}

impl FromStr for BybitServer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REAL" => Ok(Self::Real),
            "TESTNET" => Ok(Self::Testnet),
            other => Err(format!("unknown Bybit server '{other}' (expected REAL or TESTNET)")),
        }
    }
}
