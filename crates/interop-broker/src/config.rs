use interop_auth::AuthConfig;
use interop_core::BrokerSettings;
use interop_notifications::WebhookConfig;
use serde::{Deserialize, Serialize};

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(String),

    #[error("config deserialize error: {0}")]
    Deserialize(String),

    #[error("auth config error: {0}")]
    Auth(#[from] interop_auth::ConfigError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BrokerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// API keys and rate limiting
    #[serde(default)]
    pub auth: AuthConfig,
    /// Dedupe window and consumer delivery
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        self.auth.validate()?;
        self.broker.validate().map_err(ConfigError::Invalid)?;
        self.webhooks.validate().map_err(ConfigError::Invalid)?;
        if self.audit.capacity == 0 {
            return Err(ConfigError::Invalid("audit.capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Entries kept before the oldest are dropped.
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

pub mod loader {
    use super::{BrokerConfig, ConfigError};
    use config::{Config, Environment, File, FileFormat};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_PATH: &str = "interop.toml";
    pub const ENV_PREFIX: &str = "INTEROP";

    /// Load `path` (or `interop.toml`) when it exists, then apply
    /// `INTEROP__SECTION__KEY` environment overrides and validate.
    pub fn load_config(path: Option<&str>) -> Result<BrokerConfig, ConfigError> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf).format(FileFormat::Toml));
        }
        // e.g. INTEROP__AUTH__RATE_LIMITING__REQUESTS_PER_WINDOW=5
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let merged: BrokerConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        merged.validate()?;
        Ok(merged)
    }

    /// Parse a TOML document without touching the filesystem or environment.
    pub fn load_config_from_str(toml: &str) -> Result<BrokerConfig, ConfigError> {
        let cfg = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let parsed: BrokerConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<BrokerConfig, ConfigError> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
