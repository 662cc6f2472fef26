use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// `[webhooks]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebhookConfig {
    /// Deliveries in flight across all subscriptions.
    pub max_concurrency: usize,

    /// Deliveries in flight per subscription.
    pub per_subscription_concurrency: usize,

    /// Spawned deliveries not yet finished, including those waiting for a
    /// permit or a retry. New deliveries beyond this fail with `backlog_full`.
    pub max_pending_deliveries: usize,

    /// Timeout for one delivery attempt, including the response.
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Consecutive failed deliveries before a subscription is marked unhealthy.
    pub unhealthy_threshold: u32,

    /// Delivery records kept in the in-memory ledger.
    pub ledger_capacity: usize,

    /// Buffer of the delivery outcome broadcast channel.
    pub outcome_buffer: usize,

    pub user_agent: String,

    pub retry: RetryPolicy,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 32,
            per_subscription_concurrency: 4,
            max_pending_deliveries: 4096,
            attempt_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            unhealthy_threshold: 5,
            ledger_capacity: 10_000,
            outcome_buffer: 1024,
            user_agent: concat!("interop-broker/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("webhooks.max_concurrency must be > 0".to_string());
        }
        if self.per_subscription_concurrency == 0 {
            return Err("webhooks.per_subscription_concurrency must be > 0".to_string());
        }
        if self.per_subscription_concurrency > self.max_concurrency {
            return Err(
                "webhooks.per_subscription_concurrency must not exceed max_concurrency".to_string(),
            );
        }
        if self.max_pending_deliveries < self.max_concurrency {
            return Err(
                "webhooks.max_pending_deliveries must be at least max_concurrency".to_string(),
            );
        }
        if self.attempt_timeout.is_zero() {
            return Err("webhooks.attempt_timeout must be > 0".to_string());
        }
        if self.unhealthy_threshold == 0 {
            return Err("webhooks.unhealthy_threshold must be > 0".to_string());
        }
        if self.ledger_capacity == 0 || self.outcome_buffer == 0 {
            return Err("webhooks.ledger_capacity and outcome_buffer must be > 0".to_string());
        }
        self.retry.validate()
    }
}
