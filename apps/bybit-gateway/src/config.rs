//! Configuration module for the Bybit gateway.
//!
//! Loads YAML with `${VAR}` / `${VAR:-default}` environment interpolation and
//! validates it before anything connects.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bybit_gateway::config::load_config;
//!
//! let config = load_config(Some("gateway.yaml"))?;
//! println!("server: {}", config.exchange.server);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::bybit::BybitServer;
use crate::infrastructure::rest::EngineOptions;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Exchange credentials and endpoint.
    pub exchange: ExchangeConfig,
    /// Request engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Order id allocation.
    #[serde(default)]
    pub orders: OrdersConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Exchange credentials and endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// API secret.
    #[serde(default)]
    pub api_secret: String,
    /// Bybit environment.
    #[serde(default)]
    pub server: BybitServer,
    /// Override the REST base URL (proxies, tests).
    #[serde(default)]
    pub rest_url: Option<String>,
}

impl ExchangeConfig {
    /// REST base URL: the override, else the server's host.
    #[must_use]
    pub fn rest_base_url(&self) -> &str {
        self.rest_url
            .as_deref()
            .unwrap_or_else(|| self.server.rest_base_url())
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("server", &self.server)
            .field("rest_url", &self.rest_url)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}

/// Request engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Worker permits per available core.
    #[serde(default = "default_workers_per_core")]
    pub workers_per_core: usize,
    /// Bound on admitted-but-unresolved requests.
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,
    /// Cap on idle pooled sessions.
    #[serde(default)]
    pub max_idle_sessions: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            workers_per_core: default_workers_per_core(),
            max_outstanding: default_max_outstanding(),
            max_idle_sessions: None,
        }
    }
}

impl EngineConfig {
    /// Engine options for these settings.
    #[must_use]
    pub const fn to_options(&self) -> EngineOptions {
        EngineOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            workers_per_core: self.workers_per_core,
            max_outstanding: self.max_outstanding,
            max_idle_sessions: self.max_idle_sessions,
        }
    }
}

const fn default_timeout_ms() -> u64 {
    15_000
}
const fn default_workers_per_core() -> usize {
    20
}
const fn default_max_outstanding() -> usize {
    10_000
}

/// Order id allocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrdersConfig {
    /// Local id prefix; defaults to the process start time (`yymmddHHMMSS`).
    #[serde(default)]
    pub id_prefix: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (`json` or `pretty`).
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "gateway.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<GatewayConfig, ConfigError> {
    let path = path.unwrap_or("gateway.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<GatewayConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: GatewayConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is a compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &GatewayConfig) -> Result<(), ConfigError> {
    if config.exchange.api_key.is_empty() {
        return Err(ConfigError::MissingEnvVar(
            "exchange.api_key (set BYBIT_API_KEY)".to_string(),
        ));
    }
    if config.exchange.api_secret.is_empty() {
        return Err(ConfigError::MissingEnvVar(
            "exchange.api_secret (set BYBIT_API_SECRET)".to_string(),
        ));
    }

    if let Some(url) = &config.exchange.rest_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "exchange.rest_url must be an http(s) URL, got '{url}'"
            )));
        }
    }

    if config.engine.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "engine.timeout_ms must be positive".to_string(),
        ));
    }
    if config.engine.workers_per_core == 0 {
        return Err(ConfigError::ValidationError(
            "engine.workers_per_core must be positive".to_string(),
        ));
    }
    if config.engine.max_outstanding == 0 {
        return Err(ConfigError::ValidationError(
            "engine.max_outstanding must be positive".to_string(),
        ));
    }

    if let Some(prefix) = &config.orders.id_prefix {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::ValidationError(
                "orders.id_prefix must be non-empty alphanumeric".to_string(),
            ));
        }
    }

    let valid_formats = ["json", "pretty"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "logging.format must be one of: {valid_formats:?}"
        )));
    }

    Ok(())
}
