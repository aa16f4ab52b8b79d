//! HMAC-SHA256 request signing for Bybit private endpoints.
//!
//! Every signed request carries `api_key`, `recv_window` and `timestamp`.
//! The canonical string is the `key=value` pairs sorted by key and joined
//! with `&`; its lowercase hex HMAC-SHA256 is added as `sign`.

use std::collections::BTreeMap;
use std::fmt;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use sha2::Sha256;

use super::error::SigningError;

type HmacSha256 = Hmac<Sha256>;

/// Window in which Bybit accepts a signed request, in milliseconds.
pub const RECV_WINDOW_MS: i64 = 30_000;

/// Offset applied to the local clock when stamping requests, in milliseconds.
///
/// Stamping slightly in the past keeps requests valid when the local clock
/// runs ahead of the exchange.
pub const TIMESTAMP_OFFSET_MS: i64 = -5_000;

/// Parameter name of the signature itself.
pub const SIGN_PARAM: &str = "sign";

/// Query or body parameters, kept sorted by key.
pub type Params = BTreeMap<String, ParamValue>;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// String value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Decimal value, rendered without exponent.
    Decimal(Decimal),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Str(s) => serializer.serialize_str(s),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Decimal(d) => serializer.collect_str(d),
            Self::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<Decimal> for ParamValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Render parameters as `k1=v1&k2=v2`, sorted by key.
#[must_use]
pub fn canonical_string(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex HMAC-SHA256 of `message` keyed by `secret`.
pub fn sign(secret: &[u8], message: &str) -> Result<String, SigningError> {
    if secret.is_empty() {
        return Err(SigningError::MissingSecret);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Current request timestamp: local clock in milliseconds plus
/// [`TIMESTAMP_OFFSET_MS`].
#[must_use]
pub fn request_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis() + TIMESTAMP_OFFSET_MS
}

/// Signs request parameters with one API key pair.
#[derive(Clone)]
pub struct Signer {
    api_key: String,
    secret: String,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Signer {
    /// Create a signer from an API key pair.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self, SigningError> {
        let api_key = api_key.into();
        let secret = secret.into();
        if api_key.is_empty() {
            return Err(SigningError::MissingApiKey);
        }
        if secret.is_empty() {
            return Err(SigningError::MissingSecret);
        }
        Ok(Self { api_key, secret })
    }

    /// The API key injected into every request.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Inject `api_key`, `recv_window` and `timestamp`, then add `sign`.
    ///
    /// A `sign` left over from a previous attempt is replaced.
    pub fn sign_params(&self, params: &mut Params, timestamp_ms: i64) -> Result<(), SigningError> {
        params.remove(SIGN_PARAM);
        params.insert("api_key".to_string(), self.api_key.clone().into());
        params.insert("recv_window".to_string(), RECV_WINDOW_MS.into());
        params.insert("timestamp".to_string(), timestamp_ms.into());

        let signature = sign(self.secret.as_bytes(), &canonical_string(params))?;
        params.insert(SIGN_PARAM.to_string(), signature.into());
        Ok(())
    }
}
