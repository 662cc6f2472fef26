//! API key authentication and per-service rate limiting.
//!
//! - [`api_key`]: key generation, SHA-256 hashed storage, validation and revocation
//! - [`rate_limit`]: fixed-window quotas with per-service overrides
//! - [`config`]: `[auth]` configuration section

pub mod api_key;
pub mod config;
pub mod error;
pub mod rate_limit;

pub use api_key::{
    API_KEY_PREFIX, ApiKeyRecord, ApiKeyStore, IssuedApiKey, Permission, ServiceInfo,
    generate_api_key, hash_api_key,
};
pub use config::{ApiKeyConfig, AuthConfig, ConfigError, RateLimitingConfig};
pub use error::{AuthError, ErrorKind};
pub use rate_limit::{RateLimitDecision, RateLimiter};
