//! Authentication and quota configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root auth configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth.api_keys]
/// header_name = "X-API-Key"
///
/// [auth.rate_limiting]
/// requests_per_window = 100
/// window = "60s"
///
/// [auth.rate_limiting.overrides]
/// fire-ems = 500
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub api_keys: ApiKeyConfig,
    pub rate_limiting: RateLimitingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApiKeyConfig {
    /// Request header carrying the API key.
    pub header_name: String,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            header_name: "X-API-Key".to_string(),
        }
    }
}

impl ApiKeyConfig {
    /// Find the API key among request headers. Header names match
    /// case-insensitively.
    pub fn key_from_headers<'a, I>(&self, headers: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        headers
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.header_name))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Fixed-window quota per service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// When disabled every request is admitted.
    pub enabled: bool,

    /// Default requests allowed per service per window.
    pub requests_per_window: u32,

    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Per-service quota overrides, keyed by service name.
    pub overrides: HashMap<String, u32>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 100,
            window: Duration::from_secs(60),
            overrides: HashMap::new(),
        }
    }
}

impl RateLimitingConfig {
    pub fn limit_for(&self, service_name: &str) -> u32 {
        self.overrides
            .get(service_name)
            .copied()
            .unwrap_or(self.requests_per_window)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_keys.header_name.trim().is_empty() {
            return Err(ConfigError::Missing("auth.api_keys.header_name".to_string()));
        }
        if !self
            .api_keys
            .header_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(ConfigError::InvalidValue(format!(
                "auth.api_keys.header_name '{}' is not a valid header name",
                self.api_keys.header_name
            )));
        }

        let rate = &self.rate_limiting;
        if rate.enabled {
            if rate.requests_per_window == 0 {
                return Err(ConfigError::InvalidValue(
                    "auth.rate_limiting.requests_per_window must be > 0".to_string(),
                ));
            }
            if rate.window.is_zero() {
                return Err(ConfigError::InvalidValue(
                    "auth.rate_limiting.window must be > 0".to_string(),
                ));
            }
            if let Some((service, _)) = rate.overrides.iter().find(|(_, limit)| **limit == 0) {
                return Err(ConfigError::InvalidValue(format!(
                    "auth.rate_limiting.overrides.{service} must be > 0"
                )));
            }
        }
        Ok(())
    }
}
