//! Command-line configuration.

use crate::logging::LogLevel;
use clap::Args;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid backend URL `{url}`: {reason}")]
    BackendUrl { url: String, reason: String },

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid bind address `{0}`")]
    BindAddress(String),
}

/// Flags shared by every transport.
#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    /// Base URL of the OData backend
    #[arg(
        long,
        global = true,
        env = "INMATE_BACKEND_URL",
        default_value = "http://localhost:5000"
    )]
    pub backend_url: String,
    /// Backend request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    pub request_timeout_secs: u64,
    /// Re-announce subscribed resources every N seconds (0 disables)
    #[arg(long, global = true, default_value_t = 0)]
    pub subscription_refresh_secs: u64,
    /// Return the proposed backend actions without calling the backend
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// Initial minimum level for log notifications sent to clients
    #[arg(long, global = true, value_parser = parse_log_level, default_value = "info")]
    pub client_log_level: LogLevel,
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
        .map_err(|_| format!("unknown log level `{s}`"))
}

/// Validated gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub backend_url: String,
    pub request_timeout: Duration,
    pub subscription_refresh: Duration,
    pub dry_run: bool,
    pub client_log_level: LogLevel,
}

impl GatewayArgs {
    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let url = reqwest::Url::parse(&self.backend_url).map_err(|e| ConfigError::BackendUrl {
            url: self.backend_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::BackendUrl {
                url: self.backend_url,
                reason: "scheme must be http or https".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(GatewayConfig {
            backend_url: self.backend_url,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            subscription_refresh: Duration::from_secs(self.subscription_refresh_secs),
            dry_run: self.dry_run,
            client_log_level: self.client_log_level,
        })
    }
}

/// Settings for the streamable HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    pub sse_keep_alive: Option<Duration>,
    pub stateful: bool,
    pub allowed_origins: HashSet<String>,
}

impl HttpConfig {
    pub fn new(
        bind: &str,
        sse_keep_alive_secs: u64,
        stateless: bool,
        allow_origin: &[String],
    ) -> Result<Self, ConfigError> {
        let bind = bind
            .parse()
            .map_err(|_| ConfigError::BindAddress(bind.to_string()))?;
        Ok(Self {
            bind,
            sse_keep_alive: (sse_keep_alive_secs > 0)
                .then(|| Duration::from_secs(sse_keep_alive_secs)),
            stateful: !stateless,
            allowed_origins: allow_origin
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}
