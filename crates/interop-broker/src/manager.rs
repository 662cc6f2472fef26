//! Service identity, quotas and webhook subscriptions.

use std::sync::Arc;
use std::time::Instant;

use interop_auth::{
    ApiKeyConfig, ApiKeyRecord, ApiKeyStore, AuthConfig, AuthError, IssuedApiKey, Permission,
    RateLimitDecision, RateLimiter, ServiceInfo,
};
use interop_core::CanonicalIncidentEvent;
use interop_notifications::{NotificationError, SubscriptionRegistry, WebhookSubscription};

use crate::audit::{AuditAction, AuditTrail};

/// Front door for API key, rate limit and subscription management.
///
/// Every state change and every refused caller is recorded in the audit
/// trail.
#[derive(Debug)]
pub struct InteropManager {
    keys: ApiKeyStore,
    limiter: RateLimiter,
    webhooks: Arc<SubscriptionRegistry>,
    audit: Arc<AuditTrail>,
    api_keys: ApiKeyConfig,
}

impl InteropManager {
    pub fn new(
        auth: &AuthConfig,
        webhooks: Arc<SubscriptionRegistry>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            keys: ApiKeyStore::new(),
            limiter: RateLimiter::new(auth.rate_limiting.clone()),
            webhooks,
            audit,
            api_keys: auth.api_keys.clone(),
        }
    }

    /// Header that carries the API key.
    pub fn api_key_header(&self) -> &str {
        &self.api_keys.header_name
    }

    pub fn api_key_config(&self) -> &ApiKeyConfig {
        &self.api_keys
    }

    pub fn issue_api_key(
        &self,
        service_name: &str,
        permissions: &[Permission],
    ) -> Result<IssuedApiKey, AuthError> {
        let issued = self.keys.issue(service_name, permissions)?;
        let granted: Vec<_> = issued.permissions.iter().map(Permission::as_str).collect();
        self.audit.record(
            AuditAction::ApiKeyIssued,
            Some(&issued.service_name),
            Some(&issued.key_id),
            format!("permissions: {}", granted.join(",")),
        );
        Ok(issued)
    }

    pub fn validate_api_key(&self, api_key: &str) -> Option<ServiceInfo> {
        self.keys.validate(api_key)
    }

    /// Resolve the caller, check `required`, then count the request against
    /// the caller's quota.
    pub fn authenticate(
        &self,
        api_key: Option<&str>,
        required: Permission,
    ) -> Result<ServiceInfo, AuthError> {
        let info = match self.keys.authenticate(api_key, required) {
            Ok(info) => info,
            Err(e) => {
                let service = match &e {
                    AuthError::InsufficientPermission { service, .. } => Some(service.as_str()),
                    _ => None,
                };
                let subject = match &e {
                    AuthError::RevokedApiKey { key_id } => Some(key_id.as_str()),
                    _ => None,
                };
                self.audit
                    .record(AuditAction::AuthenticationFailed, service, subject, e.to_string());
                return Err(e);
            }
        };

        self.check_rate_limit_detailed(&info.service_name)?;
        Ok(info)
    }

    /// Permanently revoke a key. Revoking an already revoked key succeeds.
    pub fn revoke_api_key(&self, key_id: &str) -> Result<ApiKeyRecord, AuthError> {
        let already_revoked = self.keys.get(key_id).is_some_and(|r| r.is_revoked());
        let record = self.keys.revoke(key_id)?;
        if !already_revoked {
            self.audit.record(
                AuditAction::ApiKeyRevoked,
                Some(&record.service_name),
                Some(key_id),
                "revoked",
            );
        }
        Ok(record)
    }

    pub fn api_key(&self, key_id: &str) -> Option<ApiKeyRecord> {
        self.keys.get(key_id)
    }

    pub fn list_api_keys(&self, service_name: &str) -> Vec<ApiKeyRecord> {
        self.keys.list_for_service(service_name)
    }

    /// Count one request for `service_name`; `false` once over quota.
    pub fn check_rate_limit(&self, service_name: &str) -> bool {
        self.check_rate_limit_detailed(service_name).is_ok()
    }

    pub fn check_rate_limit_detailed(
        &self,
        service_name: &str,
    ) -> Result<RateLimitDecision, AuthError> {
        self.limiter.check(service_name).inspect_err(|e| {
            self.audit
                .record(AuditAction::RateLimited, Some(service_name), None, e.to_string());
        })
    }

    /// Drop rate windows that have fully elapsed.
    pub fn prune_rate_windows(&self) -> usize {
        self.limiter.prune_idle(Instant::now())
    }

    pub fn subscribe_webhook<I, S>(
        &self,
        service_name: &str,
        url: &str,
        event_types: I,
        secret: &str,
    ) -> Result<WebhookSubscription, NotificationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscription = self
            .webhooks
            .subscribe(service_name, url, event_types, secret)?;
        let types: Vec<_> = subscription.event_types.iter().map(String::as_str).collect();
        self.audit.record(
            AuditAction::WebhookSubscribed,
            Some(&subscription.service_name),
            Some(&subscription.id),
            format!("{} for {}", subscription.url, types.join(",")),
        );
        Ok(subscription)
    }

    /// Deactivate a subscription and cancel its outstanding deliveries.
    /// Revoking an already revoked subscription succeeds without a new audit entry.
    pub fn revoke_webhook(&self, id: &str) -> Result<WebhookSubscription, NotificationError> {
        let already_revoked = self.webhooks.get(id).is_some_and(|s| s.revoked);
        let subscription = self.webhooks.revoke(id)?;
        if !already_revoked {
            self.audit.record(
                AuditAction::WebhookRevoked,
                Some(&subscription.service_name),
                Some(id),
                "revoked",
            );
        }
        Ok(subscription)
    }

    /// Clear the unhealthy state and failure count of a subscription.
    pub fn reactivate_webhook(&self, id: &str) -> Result<WebhookSubscription, NotificationError> {
        let subscription = self.webhooks.reactivate(id)?;
        self.audit.record(
            AuditAction::WebhookReactivated,
            Some(&subscription.service_name),
            Some(id),
            "reactivated",
        );
        Ok(subscription)
    }

    pub fn webhook(&self, id: &str) -> Option<WebhookSubscription> {
        self.webhooks.get(id)
    }

    pub fn list_webhooks(&self, service_name: &str) -> Vec<WebhookSubscription> {
        self.webhooks.list_for_service(service_name)
    }

    /// Active, healthy subscriptions that want this event's type.
    pub fn match_subscribers(&self, event: &CanonicalIncidentEvent) -> Vec<WebhookSubscription> {
        self.webhooks.match_subscribers(&event.event_type)
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.webhooks
    }
}
