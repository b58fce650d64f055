//! Session configuration from environment variables.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_PUSH_URL: &str = "ws://localhost:8080";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not a valid URL ({value}): {reason}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{var} must be a positive number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },
}

/// Timing policy and endpoints for a [`crate::SyncSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL every API path is joined onto.
    pub api_url: String,
    /// Push channel endpoint. `None` runs the session on polling alone.
    pub push_url: Option<String>,
    pub liveness_period: Duration,
    pub roster_period: Duration,
    /// Period of the focused detail panel (one section at a time).
    pub detail_period: Duration,
    /// Period of the expanded view (status, stats and events together).
    pub expanded_period: Duration,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub notification_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            push_url: Some(DEFAULT_PUSH_URL.to_string()),
            liveness_period: Duration::from_secs(5),
            roster_period: Duration::from_secs(3),
            detail_period: Duration::from_secs(2),
            expanded_period: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            notification_ttl: Duration::from_secs(3),
        }
    }
}

impl SyncConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `AUTOMED_API_URL`: API base URL (default: "http://localhost:8080/api")
    /// - `AUTOMED_WS_URL`: push channel URL, or "off" to disable (default: "ws://localhost:8080")
    /// - `AUTOMED_LIVENESS_SECS`: health check period (default: 5)
    /// - `AUTOMED_ROSTER_SECS`: roster refresh period (default: 3)
    /// - `AUTOMED_RECONNECT_SECS`: push reconnect delay (default: 3)
    /// - `AUTOMED_TIMEOUT_SECS`: per-request timeout (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(api_url) = lookup("AUTOMED_API_URL") {
            config.api_url = parse_url("AUTOMED_API_URL", &api_url)?;
        }

        match lookup("AUTOMED_WS_URL").map(|v| v.trim().to_string()) {
            Some(value) if value.eq_ignore_ascii_case("off") || value.is_empty() => {
                config.push_url = None;
            }
            Some(value) => config.push_url = Some(parse_url("AUTOMED_WS_URL", &value)?),
            None => {}
        }

        if let Some(period) = parse_seconds(&lookup, "AUTOMED_LIVENESS_SECS")? {
            config.liveness_period = period;
        }
        if let Some(period) = parse_seconds(&lookup, "AUTOMED_ROSTER_SECS")? {
            config.roster_period = period;
        }
        if let Some(delay) = parse_seconds(&lookup, "AUTOMED_RECONNECT_SECS")? {
            config.reconnect_delay = delay;
        }
        if let Some(timeout) = parse_seconds(&lookup, "AUTOMED_TIMEOUT_SECS")? {
            config.request_timeout = timeout;
        }

        Ok(config)
    }
}

fn parse_url(var: &'static str, value: &str) -> Result<String, ConfigError> {
    url::Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    Ok(value.trim().trim_end_matches('/').to_string())
}

fn parse_seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        _ => Err(ConfigError::InvalidSeconds { var, value: raw }),
    }
}
