use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Subscription registry and setup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("Subscription must name at least one event type")]
    EmptyEventTypes,

    #[error("Webhook secret must not be empty")]
    EmptySecret,

    #[error("Service name must not be empty")]
    EmptyServiceName,

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Subscription has been revoked: {0}")]
    SubscriptionRevoked(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Failed to build payload: {0}")]
    Payload(String),
}

impl DeliveryError {
    /// Network failures, timeouts and HTTP 5xx/408/429 are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::Payload(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why a delivery ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Every allowed attempt failed with a transient error.
    AttemptsExhausted { last_error: DeliveryError },
    /// The receiver returned a response that retrying cannot fix.
    NonRetryable { error: DeliveryError },
    /// The subscription's circuit breaker opened while the delivery was scheduled.
    SubscriptionUnhealthy,
    /// Too many deliveries were already pending; this one was never attempted.
    BacklogFull,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AttemptsExhausted { .. } => "attempts_exhausted",
            Self::NonRetryable { .. } => "non_retryable",
            Self::SubscriptionUnhealthy => "subscription_unhealthy",
            Self::BacklogFull => "backlog_full",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted { last_error } => {
                write!(f, "attempts exhausted, last error: {last_error}")
            }
            Self::NonRetryable { error } => write!(f, "non-retryable response: {error}"),
            Self::SubscriptionUnhealthy => write!(f, "subscription is unhealthy"),
            Self::BacklogFull => write!(f, "delivery backlog is full"),
        }
    }
}

/// A delivery that will not be retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Delivery {delivery_id} to subscription {subscription_id} failed after {attempts} attempt(s): {reason}")]
pub struct PermanentDeliveryError {
    pub delivery_id: String,
    pub subscription_id: String,
    pub event_id: String,
    pub attempts: u32,
    pub reason: FailureReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for status in [500, 502, 503, 408, 429] {
            let err = DeliveryError::HttpStatus {
                status,
                body: String::new(),
            };
            assert!(err.is_retryable(), "{status}");
        }
        for status in [400, 401, 404, 410, 422] {
            let err = DeliveryError::HttpStatus {
                status,
                body: String::new(),
            };
            assert!(!err.is_retryable(), "{status}");
        }
        assert!(DeliveryError::Network("connection refused".into()).is_retryable());
        assert!(DeliveryError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!DeliveryError::Payload("bad".into()).is_retryable());
    }

    #[test]
    fn test_permanent_error_display() {
        let err = PermanentDeliveryError {
            delivery_id: "d-1".into(),
            subscription_id: "s-1".into(),
            event_id: "e-1".into(),
            attempts: 1,
            reason: FailureReason::NonRetryable {
                error: DeliveryError::HttpStatus {
                    status: 410,
                    body: "gone".into(),
                },
            },
        };
        assert_eq!(
            err.to_string(),
            "Delivery d-1 to subscription s-1 failed after 1 attempt(s): non-retryable response: HTTP 410: gone"
        );
        assert_eq!(err.reason.code(), "non_retryable");
    }
}
