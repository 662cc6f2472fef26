//! Consumer trait for canonical incident events.
//!
//! Consumers are asynchronous handlers that receive every accepted event
//! they are interested in. They are designed to be:
//! - **Async**: each consumer is driven by its own worker task
//! - **Isolated**: a failing or slow consumer never affects the others
//! - **At-least-once**: a failed `handle` call is retried by the broker

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{CanonicalIncidentEvent, IncidentSource};

/// Error type for consumer operations.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Consumer execution failed with a message.
    #[error("Consumer execution failed: {0}")]
    Execution(String),

    /// Consumer failed to hand the event to its storage backend.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Consumer failed due to a network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Consumer did not finish within the configured timeout.
    #[error("Consumer timed out after {0:?}")]
    Timeout(Duration),

    /// Consumer panicked while handling the event.
    #[error("Consumer panicked: {0}")]
    Panicked(String),
}

impl ConsumerError {
    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        ConsumerError::Execution(msg.into())
    }

    /// Create a storage error from a string.
    pub fn storage(msg: impl Into<String>) -> Self {
        ConsumerError::Storage(msg.into())
    }

    /// Create a network error from a string.
    pub fn network(msg: impl Into<String>) -> Self {
        ConsumerError::Network(msg.into())
    }
}

/// Trait for canonical event consumers.
///
/// # Implementation Notes
///
/// - `handle` may be called more than once for the same event
///   (at-least-once delivery), so it should be idempotent on `event_id`
/// - For heavy work, hand off to an internal queue and return quickly
/// - Errors are logged and retried but never reach the publisher
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Unique name for this consumer (for logging and stats).
    fn name(&self) -> &str;

    /// Event types this consumer is interested in.
    ///
    /// Return an empty slice to match all event types.
    fn event_types(&self) -> &[&str] {
        &[]
    }

    /// Sources this consumer is interested in.
    ///
    /// Return an empty slice to match all sources.
    fn sources(&self) -> &[IncidentSource] {
        &[]
    }

    /// Handle an accepted canonical event.
    async fn handle(&self, event: Arc<CanonicalIncidentEvent>) -> Result<(), ConsumerError>;

    /// Called once when the consumer is registered.
    async fn on_start(&self) -> Result<(), ConsumerError> {
        Ok(())
    }

    /// Called once after the consumer's queue has drained on shutdown.
    async fn on_shutdown(&self) -> Result<(), ConsumerError> {
        Ok(())
    }

    /// Check if this consumer should receive the given event.
    fn matches(&self, event: &CanonicalIncidentEvent) -> bool {
        let types = self.event_types();
        if !types.is_empty() && !types.contains(&event.event_type.as_str()) {
            return false;
        }

        let sources = self.sources();
        if !sources.is_empty() && !sources.contains(&event.source) {
            return false;
        }

        true
    }
}
