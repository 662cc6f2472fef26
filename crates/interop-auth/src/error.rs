//! Authentication, authorization and throttling errors.

use std::fmt;
use std::time::Duration;

use crate::api_key::Permission;

/// Errors returned when a caller cannot be admitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No API key was presented.
    #[error("API key required")]
    MissingApiKey,

    /// The presented key does not match any issued key.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The presented key was revoked.
    #[error("API key {key_id} has been revoked")]
    RevokedApiKey {
        /// Id of the revoked key record.
        key_id: String,
    },

    /// The key is valid but lacks the permission the operation needs.
    #[error("Service {service} lacks {required} permission")]
    InsufficientPermission {
        service: String,
        required: Permission,
    },

    /// The service exceeded its request quota for the current window.
    #[error("Rate limit exceeded for {service}, retry after {}s", retry_after.as_secs())]
    RateLimited {
        service: String,
        /// Time until the current window resets.
        retry_after: Duration,
    },

    /// No key record exists with this id.
    #[error("Unknown API key id: {key_id}")]
    UnknownKey { key_id: String },

    /// The request itself is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl AuthError {
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingApiKey | Self::InvalidApiKey | Self::RevokedApiKey { .. } => {
                ErrorKind::Authentication
            }
            Self::InsufficientPermission { .. } => ErrorKind::Authorization,
            Self::RateLimited { .. } => ErrorKind::Throttling,
            Self::UnknownKey { .. } | Self::InvalidRequest { .. } => ErrorKind::Validation,
        }
    }

    /// Only throttling is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Stable code for responses and audit entries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidApiKey => "invalid_api_key",
            Self::RevokedApiKey { .. } => "revoked_api_key",
            Self::InsufficientPermission { .. } => "insufficient_permission",
            Self::RateLimited { .. } => "rate_limited",
            Self::UnknownKey { .. } => "unknown_key",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }
}

/// Broad classification of auth failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Throttling,
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Throttling => write!(f, "throttling"),
            Self::Validation => write!(f, "validation"),
        }
    }
}
