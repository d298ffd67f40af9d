//! API Configuration Module
//!
//! Bind address and CORS settings for the HTTP surface. Core tunables
//! (thresholds, timeouts, capacities) live in `fleetsync_core::SyncConfig`.

use crate::error::{ApiError, ApiResult};
use std::net::SocketAddr;

/// Default listen host.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// HTTP surface configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Host or IP to bind.
    pub bind_host: String,

    /// Port to bind.
    pub port: u16,

    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    /// Example: "https://admin.example.com,https://ops.example.com"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `FLEETSYNC_API_BIND`: Host to bind (default: 0.0.0.0)
    /// - `PORT` or `FLEETSYNC_API_PORT`: Port to bind (default: 3000)
    /// - `FLEETSYNC_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `FLEETSYNC_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `FLEETSYNC_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    ///
    /// An unparseable port is an error rather than a silent fallback, so a
    /// typo never binds the server somewhere unexpected.
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();

        let bind_host =
            std::env::var("FLEETSYNC_API_BIND").unwrap_or_else(|_| defaults.bind_host.clone());

        let port = match std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("FLEETSYNC_API_PORT").ok())
        {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", raw)))?,
            None => defaults.port,
        };

        let cors_origins = std::env::var("FLEETSYNC_CORS_ORIGINS")
            .ok()
            .map(|s| parse_origins(&s))
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("FLEETSYNC_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.cors_allow_credentials);

        let cors_max_age_secs = std::env::var("FLEETSYNC_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        Ok(Self {
            bind_host,
            port,
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
        })
    }

    /// The socket address to listen on.
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }

    /// Check if running with a restricted origin list.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect()
}
