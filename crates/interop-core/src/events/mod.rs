//! Event broker for canonical incident events.
//!
//! # Architecture
//!
//! ```text
//!   MOI   Fire/EMS   Traffic   Municipal      (source adapters)
//!    │       │          │          │
//!    └───────┴────┬─────┴──────────┘
//!                 ▼
//! ┌─────────────────────────────────────────┐
//! │               EventBroker               │
//! │  dedupe index (source, incident_id)     │
//! │  consumer registry (one queue each)     │
//! └─────────────────────────────────────────┘
//!          │               │              │
//!          ▼               ▼              ▼
//!    ┌──────────┐   ┌────────────┐  ┌──────────┐
//!    │ storage  │   │  webhook   │  │   ...    │
//!    │ consumer │   │ dispatcher │  │          │
//!    └──────────┘   └────────────┘  └──────────┘
//! ```
//!
//! - [`broker`]: dedupe and publish
//! - [`consumer`]: consumer trait and error type
//! - [`registry`]: consumer registration and per-consumer workers

pub mod broker;
pub mod consumer;
pub mod registry;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use broker::{EventBroker, PublishResult};
pub use consumer::{ConsumerError, EventConsumer};
pub use registry::{ConsumerRegistry, ConsumerStats};

/// Broker tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    /// How long accepted dedupe keys are remembered.
    #[serde(with = "humantime_serde")]
    pub dedupe_window: Duration,

    /// Timeout for a single consumer `handle` call.
    #[serde(with = "humantime_serde")]
    pub consumer_timeout: Duration,

    /// Events buffered per consumer. When a consumer's queue is full, new
    /// events are dropped for that consumer and counted.
    pub consumer_queue_capacity: usize,

    /// Attempts per event per consumer, including the first.
    pub consumer_max_attempts: u32,

    /// Base delay between consumer retries; grows linearly per attempt.
    #[serde(with = "humantime_serde")]
    pub consumer_retry_delay: Duration,

    /// How long shutdown waits for each consumer queue to drain.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// How often the host prunes expired dedupe markers.
    #[serde(with = "humantime_serde")]
    pub prune_interval: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_secs(24 * 60 * 60),
            consumer_timeout: Duration::from_secs(30),
            consumer_queue_capacity: 10_000,
            consumer_max_attempts: 3,
            consumer_retry_delay: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(10),
            prune_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl BrokerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.consumer_max_attempts == 0 {
            return Err("broker.consumer_max_attempts must be > 0".to_string());
        }
        if self.consumer_queue_capacity == 0 {
            return Err("broker.consumer_queue_capacity must be > 0".to_string());
        }
        if self.consumer_timeout.is_zero() {
            return Err("broker.consumer_timeout must be > 0".to_string());
        }
        if self.prune_interval.is_zero() {
            return Err("broker.prune_interval must be > 0".to_string());
        }
        Ok(())
    }
}
