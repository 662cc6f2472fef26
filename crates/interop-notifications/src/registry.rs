//! Webhook subscription registry with a per-subscription circuit breaker.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::error::NotificationError;
use crate::types::{SubscriptionHealth, WebhookSecret, WebhookSubscription};

struct Entry {
    subscription: WebhookSubscription,
    /// Cancelled on revoke; stops queued and in-flight deliveries.
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
}

/// Handles a delivery task needs for one subscription.
#[derive(Debug, Clone)]
pub struct DeliveryTarget {
    pub subscription: WebhookSubscription,
    pub cancel: CancellationToken,
    pub permits: Arc<Semaphore>,
}

pub struct SubscriptionRegistry {
    entries: DashMap<String, Entry>,
    unhealthy_threshold: u32,
    per_subscription_concurrency: usize,
}

impl SubscriptionRegistry {
    pub fn new(unhealthy_threshold: u32, per_subscription_concurrency: usize) -> Self {
        Self {
            entries: DashMap::new(),
            unhealthy_threshold: unhealthy_threshold.max(1),
            per_subscription_concurrency: per_subscription_concurrency.max(1),
        }
    }

    pub fn unhealthy_threshold(&self) -> u32 {
        self.unhealthy_threshold
    }

    /// Validate and register a subscription.
    pub fn subscribe<I, S>(
        &self,
        service_name: &str,
        url: &str,
        event_types: I,
        secret: impl Into<WebhookSecret>,
    ) -> Result<WebhookSubscription, NotificationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(NotificationError::EmptyServiceName);
        }

        let url = Url::parse(url.trim())
            .map_err(|e| NotificationError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(NotificationError::InvalidUrl(format!(
                "{url}: must be an absolute http or https URL"
            )));
        }

        let event_types: BTreeSet<String> = event_types
            .into_iter()
            .map(Into::into)
            .map(|t: String| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if event_types.is_empty() {
            return Err(NotificationError::EmptyEventTypes);
        }

        let secret = secret.into();
        if secret.is_empty() {
            return Err(NotificationError::EmptySecret);
        }

        let subscription = WebhookSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            service_name: service_name.to_string(),
            url,
            event_types,
            secret,
            health: SubscriptionHealth::Active,
            revoked: false,
            consecutive_failures: 0,
            created_at: OffsetDateTime::now_utc(),
        };

        self.entries.insert(
            subscription.id.clone(),
            Entry {
                subscription: subscription.clone(),
                cancel: CancellationToken::new(),
                permits: Arc::new(Semaphore::new(self.per_subscription_concurrency)),
            },
        );

        info!(
            subscription_id = %subscription.id,
            service = %subscription.service_name,
            url = %subscription.url,
            event_types = ?subscription.event_types,
            "Webhook subscription registered"
        );
        Ok(subscription)
    }

    /// Deactivate a subscription and cancel its outstanding deliveries.
    pub fn revoke(&self, id: &str) -> Result<WebhookSubscription, NotificationError> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| NotificationError::SubscriptionNotFound(id.to_string()))?;
        if !entry.subscription.revoked {
            entry.subscription.revoked = true;
            entry.cancel.cancel();
            info!(subscription_id = %id, "Webhook subscription revoked");
        }
        Ok(entry.subscription.clone())
    }

    /// Close the circuit breaker and reset the failure count.
    pub fn reactivate(&self, id: &str) -> Result<WebhookSubscription, NotificationError> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| NotificationError::SubscriptionNotFound(id.to_string()))?;
        if entry.subscription.revoked {
            return Err(NotificationError::SubscriptionRevoked(id.to_string()));
        }
        entry.subscription.health = SubscriptionHealth::Active;
        entry.subscription.consecutive_failures = 0;
        info!(subscription_id = %id, "Webhook subscription reactivated");
        Ok(entry.subscription.clone())
    }

    pub fn get(&self, id: &str) -> Option<WebhookSubscription> {
        self.entries.get(id).map(|e| e.subscription.clone())
    }

    pub fn list(&self) -> Vec<WebhookSubscription> {
        let mut subscriptions: Vec<_> = self
            .entries
            .iter()
            .map(|e| e.subscription.clone())
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        subscriptions
    }

    pub fn list_for_service(&self, service_name: &str) -> Vec<WebhookSubscription> {
        self.list()
            .into_iter()
            .filter(|s| s.service_name == service_name)
            .collect()
    }

    /// Deliverable subscriptions that want `event_type`.
    pub fn match_subscribers(&self, event_type: &str) -> Vec<WebhookSubscription> {
        self.list()
            .into_iter()
            .filter(|s| s.is_deliverable() && s.wants(event_type))
            .collect()
    }

    pub fn target(&self, id: &str) -> Option<DeliveryTarget> {
        self.entries.get(id).map(|e| DeliveryTarget {
            subscription: e.subscription.clone(),
            cancel: e.cancel.clone(),
            permits: e.permits.clone(),
        })
    }

    pub fn is_deliverable(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.subscription.is_deliverable())
    }

    /// Reset the failure count after a delivered webhook.
    pub fn record_success(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.subscription.consecutive_failures = 0;
        }
    }

    /// Count a failed delivery; returns the resulting health.
    pub fn record_failure(&self, id: &str) -> Option<SubscriptionHealth> {
        let mut entry = self.entries.get_mut(id)?;
        let subscription = &mut entry.subscription;
        subscription.consecutive_failures = subscription.consecutive_failures.saturating_add(1);

        if subscription.health == SubscriptionHealth::Active
            && subscription.consecutive_failures >= self.unhealthy_threshold
        {
            subscription.health = SubscriptionHealth::Unhealthy;
            warn!(
                subscription_id = %subscription.id,
                service = %subscription.service_name,
                consecutive_failures = subscription.consecutive_failures,
                "Webhook subscription marked unhealthy"
            );
        }
        Some(subscription.health)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .field("unhealthy_threshold", &self.unhealthy_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(3, 2)
    }

    #[test]
    fn test_subscribe_validates_input() {
        let registry = registry();

        assert_eq!(
            registry
                .subscribe("dash", "not a url", ["fire_incident"], "s")
                .unwrap_err()
                .to_string()
                .split(':')
                .next(),
            Some("Invalid webhook URL")
        );
        assert!(matches!(
            registry.subscribe("dash", "ftp://example.com/hook", ["fire_incident"], "s"),
            Err(NotificationError::InvalidUrl(_))
        ));
        assert_eq!(
            registry
                .subscribe("dash", "https://example.com/hook", Vec::<String>::new(), "s")
                .unwrap_err(),
            NotificationError::EmptyEventTypes
        );
        assert_eq!(
            registry
                .subscribe("dash", "https://example.com/hook", [" "], "s")
                .unwrap_err(),
            NotificationError::EmptyEventTypes
        );
        assert_eq!(
            registry
                .subscribe("dash", "https://example.com/hook", ["fire_incident"], "")
                .unwrap_err(),
            NotificationError::EmptySecret
        );
        assert_eq!(
            registry
                .subscribe("", "https://example.com/hook", ["fire_incident"], "s")
                .unwrap_err(),
            NotificationError::EmptyServiceName
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_match_subscribers_by_event_type() {
        let registry = registry();
        let fire = assert_ok!(registry.subscribe(
            "dash",
            "https://example.com/fire",
            ["fire_incident", "ambulance_deployment"],
            "s1"
        ));
        assert_ok!(registry.subscribe("city", "https://example.com/city", ["complaint"], "s2"));

        let matched = registry.match_subscribers("fire_incident");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, fire.id);
        assert!(registry.match_subscribers("hazard_report").is_empty());
    }

    #[test]
    fn test_circuit_breaker_opens_at_threshold() {
        let registry = registry();
        let sub = registry
            .subscribe("dash", "https://example.com/hook", ["fire_incident"], "s")
            .unwrap();

        assert_eq!(registry.record_failure(&sub.id), Some(SubscriptionHealth::Active));
        assert_eq!(registry.record_failure(&sub.id), Some(SubscriptionHealth::Active));
        assert_eq!(registry.record_failure(&sub.id), Some(SubscriptionHealth::Unhealthy));

        assert!(registry.match_subscribers("fire_incident").is_empty());
        assert!(!registry.is_deliverable(&sub.id));

        let reactivated = assert_ok!(registry.reactivate(&sub.id));
        assert_eq!(reactivated.health, SubscriptionHealth::Active);
        assert_eq!(reactivated.consecutive_failures, 0);
        assert_eq!(registry.match_subscribers("fire_incident").len(), 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let registry = registry();
        let sub = registry
            .subscribe("dash", "https://example.com/hook", ["fire_incident"], "s")
            .unwrap();

        registry.record_failure(&sub.id);
        registry.record_failure(&sub.id);
        registry.record_success(&sub.id);
        registry.record_failure(&sub.id);

        let current = registry.get(&sub.id).unwrap();
        assert_eq!(current.consecutive_failures, 1);
        assert_eq!(current.health, SubscriptionHealth::Active);
    }

    #[test]
    fn test_revoke_cancels_token() {
        let registry = registry();
        let sub = registry
            .subscribe("dash", "https://example.com/hook", ["fire_incident"], "s")
            .unwrap();
        let target = registry.target(&sub.id).unwrap();
        assert!(!target.cancel.is_cancelled());

        let revoked = assert_ok!(registry.revoke(&sub.id));
        assert!(revoked.revoked);
        assert!(target.cancel.is_cancelled());
        assert!(registry.match_subscribers("fire_incident").is_empty());

        let err = assert_err!(registry.reactivate(&sub.id));
        assert_eq!(err, NotificationError::SubscriptionRevoked(sub.id.clone()));
        assert_err!(registry.revoke("missing"));
    }
}
