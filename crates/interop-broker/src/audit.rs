//! Bounded in-memory audit trail.
//!
//! Security-relevant and failure events are recorded here and logged. Entries
//! carry ids and service names only; API keys and webhook secrets never
//! reach the trail.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use interop_notifications::DeliveryOutcome;
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    IngestionRejected,
    AuthenticationFailed,
    RateLimited,
    ApiKeyIssued,
    ApiKeyRevoked,
    WebhookSubscribed,
    WebhookRevoked,
    WebhookReactivated,
    DeliveryFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IngestionRejected => "ingestion_rejected",
            Self::AuthenticationFailed => "authentication_failed",
            Self::RateLimited => "rate_limited",
            Self::ApiKeyIssued => "api_key_issued",
            Self::ApiKeyRevoked => "api_key_revoked",
            Self::WebhookSubscribed => "webhook_subscribed",
            Self::WebhookRevoked => "webhook_revoked",
            Self::WebhookReactivated => "webhook_reactivated",
            Self::DeliveryFailed => "delivery_failed",
        }
    }

    /// Failures are logged at warn, lifecycle changes at info.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::IngestionRejected
                | Self::AuthenticationFailed
                | Self::RateLimited
                | Self::DeliveryFailed
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub action: AuditAction,
    pub service: Option<String>,
    /// Id of the affected key, subscription, delivery or record kind.
    pub subject: Option<String>,
    pub detail: String,
}

pub struct AuditTrail {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn record(
        &self,
        action: AuditAction,
        service: Option<&str>,
        subject: Option<&str>,
        detail: impl Into<String>,
    ) {
        let entry = AuditEntry {
            at: OffsetDateTime::now_utc(),
            action,
            service: service.map(str::to_string),
            subject: subject.map(str::to_string),
            detail: detail.into(),
        };

        if action.is_failure() {
            warn!(
                audit.action = %action,
                audit.service = entry.service.as_deref().unwrap_or("-"),
                audit.subject = entry.subject.as_deref().unwrap_or("-"),
                detail = %entry.detail,
                "Audit"
            );
        } else {
            info!(
                audit.action = %action,
                audit.service = entry.service.as_deref().unwrap_or("-"),
                audit.subject = entry.subject.as_deref().unwrap_or("-"),
                detail = %entry.detail,
                "Audit"
            );
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The `n` newest entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn by_action(&self, action: AuditAction) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record permanent delivery failures from the dispatcher's outcome
    /// channel until `stop` is cancelled.
    pub fn spawn_delivery_listener(
        self: &Arc<Self>,
        mut outcomes: broadcast::Receiver<DeliveryOutcome>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let trail = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    received = outcomes.recv() => received,
                    _ = stop.cancelled() => break,
                };
                match received {
                    Ok(DeliveryOutcome::Failed { attempt, error }) => trail.record(
                        AuditAction::DeliveryFailed,
                        None,
                        Some(&attempt.subscription_id),
                        error.to_string(),
                    ),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Audit trail lagged behind delivery outcomes")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditTrail")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
