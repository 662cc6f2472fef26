use std::collections::BTreeSet;
use std::fmt;

use interop_core::CanonicalIncidentEvent;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// HMAC key of a subscription. Never serialized and masked in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for WebhookSecret {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for WebhookSecret {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionHealth {
    Active,
    /// Circuit breaker open; excluded from matching until reactivated.
    Unhealthy,
}

/// External endpoint subscribed to a set of event types.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub service_name: String,
    pub url: Url,
    pub event_types: BTreeSet<String>,
    #[serde(skip)]
    pub secret: WebhookSecret,
    pub health: SubscriptionHealth,
    pub revoked: bool,
    pub consecutive_failures: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl WebhookSubscription {
    /// Active, healthy and not revoked.
    pub fn is_deliverable(&self) -> bool {
        !self.revoked && self.health == SubscriptionHealth::Active
    }

    pub fn wants(&self, event_type: &str) -> bool {
        self.event_types.contains(event_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivering,
    Delivered,
    Retrying,
    Failed,
    Cancelled,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Ledger record for one event sent to one subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryAttempt {
    pub delivery_id: String,
    pub subscription_id: String,
    pub event_id: String,
    pub event_type: String,
    pub attempt_count: u32,
    pub state: DeliveryState,
    pub last_error: Option<String>,
    pub last_status: Option<u16>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DeliveryAttempt {
    pub fn new(subscription_id: &str, event: &CanonicalIncidentEvent) -> Self {
        Self {
            delivery_id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription_id.to_string(),
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            attempt_count: 0,
            state: DeliveryState::Pending,
            last_error: None,
            last_status: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

/// JSON body sent to subscribers.
///
/// `incident` never carries the raw submitted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event_type: String,
    pub incident: CanonicalIncidentEvent,
    #[serde(with = "time::serde::rfc3339")]
    pub delivered_at: OffsetDateTime,
    pub delivery_id: String,
}

impl WebhookEnvelope {
    pub fn new(
        event: &CanonicalIncidentEvent,
        delivery_id: impl Into<String>,
        delivered_at: OffsetDateTime,
    ) -> Self {
        let mut incident = event.clone();
        incident.raw_payload.clear();
        Self {
            event_type: event.event_type.clone(),
            incident,
            delivered_at,
            delivery_id: delivery_id.into(),
        }
    }

    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
