//! Webhook dispatcher.
//!
//! Registered as a broker consumer. For every accepted event it creates one
//! delivery per matching subscription and runs it on its own task:
//!
//! ```text
//! Pending -> Delivering -> Delivered
//!               |  ^
//!               v  |
//!             Retrying -> Failed
//!
//! (any non-terminal state) -> Cancelled   on revoke or shutdown
//! ```
//!
//! Concurrency is bounded globally and per subscription. The number of
//! unfinished deliveries is capped by `max_pending_deliveries`: a delivery
//! that finds the backlog full is not spawned and fails at once with
//! `backlog_full`. The body is re-rendered and re-signed on every attempt so
//! `delivered_at` reflects the attempt that reached the receiver.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use interop_core::{CanonicalIncidentEvent, ConsumerError, EventConsumer};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::error::{DeliveryError, FailureReason, NotificationError, PermanentDeliveryError};
use crate::registry::{DeliveryTarget, SubscriptionRegistry};
use crate::signing::signature_header;
use crate::transport::{HttpTransport, WebhookRequest, WebhookTransport};
use crate::types::{DeliveryAttempt, DeliveryState, WebhookEnvelope, WebhookSubscription};

/// Broker consumer name of the dispatcher.
pub const DISPATCHER_NAME: &str = "webhook_dispatcher";

/// Terminal result of one delivery.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered {
        attempt: DeliveryAttempt,
    },
    Failed {
        attempt: DeliveryAttempt,
        error: PermanentDeliveryError,
    },
    Cancelled {
        attempt: DeliveryAttempt,
    },
}

impl DeliveryOutcome {
    pub fn attempt(&self) -> &DeliveryAttempt {
        match self {
            Self::Delivered { attempt }
            | Self::Failed { attempt, .. }
            | Self::Cancelled { attempt } => attempt,
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.attempt().state
    }
}

/// Bounded in-memory record of recent deliveries.
struct Ledger {
    records: DashMap<String, DeliveryAttempt>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Ledger {
    fn new(capacity: usize) -> Self {
        Self {
            records: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn insert(&self, attempt: DeliveryAttempt) {
        let mut order = self.order.lock();
        order.push_back(attempt.delivery_id.clone());
        self.records.insert(attempt.delivery_id.clone(), attempt);
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }

    /// Write a task's copy back. Evicted records stay evicted.
    fn sync(&self, attempt: &mut DeliveryAttempt) {
        attempt.updated_at = OffsetDateTime::now_utc();
        if let Some(mut record) = self.records.get_mut(&attempt.delivery_id) {
            *record = attempt.clone();
        }
    }

    fn get(&self, delivery_id: &str) -> Option<DeliveryAttempt> {
        self.records.get(delivery_id).map(|r| r.clone())
    }

    fn for_subscription(&self, subscription_id: &str) -> Vec<DeliveryAttempt> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| r.subscription_id == subscription_id)
            .map(|r| r.clone())
            .collect()
    }
}

struct Inner {
    registry: Arc<SubscriptionRegistry>,
    transport: Arc<dyn WebhookTransport>,
    config: WebhookConfig,
    permits: Arc<Semaphore>,
    /// One permit per spawned, unfinished delivery.
    backlog: Arc<Semaphore>,
    backlog_rejections: AtomicU64,
    ledger: Ledger,
    outcomes: broadcast::Sender<DeliveryOutcome>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Delivers accepted events to webhook subscribers.
#[derive(Clone)]
pub struct WebhookDispatcher {
    inner: Arc<Inner>,
}

impl WebhookDispatcher {
    pub fn new(
        config: WebhookConfig,
        registry: Arc<SubscriptionRegistry>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(config.outcome_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                registry,
                transport,
                permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
                backlog: Arc::new(Semaphore::new(config.max_pending_deliveries.max(1))),
                backlog_rejections: AtomicU64::new(0),
                ledger: Ledger::new(config.ledger_capacity),
                outcomes,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                config,
            }),
        }
    }

    /// Dispatcher backed by the reqwest HTTP transport.
    pub fn with_http(
        config: WebhookConfig,
        registry: Arc<SubscriptionRegistry>,
    ) -> Result<Self, NotificationError> {
        config.validate().map_err(NotificationError::InvalidConfig)?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, registry, Arc::new(transport)))
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.inner.config
    }

    /// Schedule a delivery for every subscriber of the event's type.
    ///
    /// Returns the ledger records: `Pending` for spawned deliveries, `Failed`
    /// for those refused because the backlog is full. Never waits.
    pub fn dispatch(&self, event: Arc<CanonicalIncidentEvent>) -> Vec<DeliveryAttempt> {
        if self.inner.tracker.is_closed() {
            warn!(
                event_id = %event.event_id,
                "Dispatcher is shutting down, event not delivered"
            );
            return Vec::new();
        }

        let subscribers = self.inner.registry.match_subscribers(&event.event_type);
        if subscribers.is_empty() {
            debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No webhook subscribers for event"
            );
            return Vec::new();
        }

        let mut scheduled = Vec::with_capacity(subscribers.len());
        for subscription in subscribers {
            let attempt = DeliveryAttempt::new(&subscription.id, &event);
            self.inner.ledger.insert(attempt.clone());

            let Ok(slot) = self.inner.backlog.clone().try_acquire_owned() else {
                scheduled.push(self.inner.reject_backlog_full(attempt));
                continue;
            };

            let inner = self.inner.clone();
            let event = event.clone();
            let task_attempt = attempt.clone();
            self.inner.tracker.spawn(async move {
                inner.run_delivery(event, task_attempt).await;
                drop(slot);
            });

            scheduled.push(attempt);
        }

        debug!(
            event_id = %event.event_id,
            deliveries = scheduled.len(),
            "Webhook deliveries scheduled"
        );
        scheduled
    }

    pub fn delivery(&self, delivery_id: &str) -> Option<DeliveryAttempt> {
        self.inner.ledger.get(delivery_id)
    }

    /// Ledger records of one subscription, oldest first.
    pub fn deliveries_for(&self, subscription_id: &str) -> Vec<DeliveryAttempt> {
        self.inner.ledger.for_subscription(subscription_id)
    }

    /// Number of deliveries not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Deliveries refused since start because the backlog was full.
    pub fn backlog_rejections(&self) -> u64 {
        self.inner.backlog_rejections.load(Ordering::Relaxed)
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<DeliveryOutcome> {
        self.inner.outcomes.subscribe()
    }

    /// Stop accepting deliveries and wait up to `grace` for in-flight ones.
    ///
    /// Anything still running after `grace` is cancelled. Returns `true`
    /// when every delivery finished on its own.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.tracker.close();
        let drained = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();

        if !drained {
            warn!(
                in_flight = self.inner.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "Cancelling webhook deliveries still running after grace period"
            );
            self.inner.shutdown.cancel();
            self.inner.tracker.wait().await;
        }

        info!(drained, "Webhook dispatcher shut down");
        drained
    }
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("transport", &self.inner.transport.name())
            .field("subscriptions", &self.inner.registry.len())
            .field("in_flight", &self.inner.tracker.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventConsumer for WebhookDispatcher {
    fn name(&self) -> &str {
        DISPATCHER_NAME
    }

    async fn handle(&self, event: Arc<CanonicalIncidentEvent>) -> Result<(), ConsumerError> {
        self.dispatch(event);
        Ok(())
    }
}

enum Step {
    Done(DeliveryOutcome),
    Retry(Duration),
    Cancelled,
}

impl Inner {
    async fn run_delivery(
        self: Arc<Self>,
        event: Arc<CanonicalIncidentEvent>,
        mut attempt: DeliveryAttempt,
    ) {
        let outcome = match self.registry.target(&attempt.subscription_id) {
            Some(target) => self.deliver(&event, &target, &mut attempt).await,
            None => self.cancelled(attempt),
        };

        self.report(&outcome);
        let _ = self.outcomes.send(outcome);
    }

    /// Fail a delivery that was never spawned. The subscriber is not at
    /// fault, so its failure counter is left alone.
    fn reject_backlog_full(&self, attempt: DeliveryAttempt) -> DeliveryAttempt {
        let rejected = self.backlog_rejections.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            delivery_id = %attempt.delivery_id,
            subscription_id = %attempt.subscription_id,
            event_id = %attempt.event_id,
            max_pending = self.config.max_pending_deliveries,
            rejected,
            "Webhook backlog full, delivery refused"
        );
        let outcome = self.failed(attempt, FailureReason::BacklogFull);
        let record = outcome.attempt().clone();
        self.report(&outcome);
        let _ = self.outcomes.send(outcome);
        record
    }

    async fn deliver(
        &self,
        event: &CanonicalIncidentEvent,
        target: &DeliveryTarget,
        attempt: &mut DeliveryAttempt,
    ) -> DeliveryOutcome {
        loop {
            if target.cancel.is_cancelled() || self.shutdown.is_cancelled() {
                return self.cancelled(attempt.clone());
            }

            // Health can change between attempts.
            let subscription = match self.registry.get(&target.subscription.id) {
                Some(s) if s.revoked => return self.cancelled(attempt.clone()),
                Some(s) if !s.is_deliverable() => {
                    return self.failed(attempt.clone(), FailureReason::SubscriptionUnhealthy);
                }
                Some(s) => s,
                None => return self.cancelled(attempt.clone()),
            };

            let Some(permits) = self.acquire(target).await else {
                return self.cancelled(attempt.clone());
            };

            attempt.attempt_count += 1;
            attempt.state = DeliveryState::Delivering;
            self.ledger.sync(attempt);

            let step = self.attempt(event, &subscription, target, attempt).await;
            drop(permits);

            match step {
                Step::Done(outcome) => return outcome,
                Step::Cancelled => return self.cancelled(attempt.clone()),
                Step::Retry(delay) => {
                    tokio::select! {
                        biased;
                        _ = target.cancel.cancelled() => return self.cancelled(attempt.clone()),
                        _ = self.shutdown.cancelled() => return self.cancelled(attempt.clone()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Subscription permit first, so a saturated receiver does not hold global slots.
    async fn acquire(
        &self,
        target: &DeliveryTarget,
    ) -> Option<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let permits = async {
            let local = target.permits.clone().acquire_owned().await.ok()?;
            let global = self.permits.clone().acquire_owned().await.ok()?;
            Some((local, global))
        };

        tokio::select! {
            biased;
            _ = target.cancel.cancelled() => None,
            _ = self.shutdown.cancelled() => None,
            permits = permits => permits,
        }
    }

    async fn attempt(
        &self,
        event: &CanonicalIncidentEvent,
        subscription: &WebhookSubscription,
        target: &DeliveryTarget,
        attempt: &mut DeliveryAttempt,
    ) -> Step {
        let request = match render_request(event, subscription, &attempt.delivery_id) {
            Ok(request) => request,
            Err(error) => {
                return Step::Done(
                    self.failed(attempt.clone(), FailureReason::NonRetryable { error }),
                );
            }
        };

        let timeout = self.config.attempt_timeout;
        let result = tokio::select! {
            biased;
            _ = target.cancel.cancelled() => return Step::Cancelled,
            _ = self.shutdown.cancelled() => return Step::Cancelled,
            result = tokio::time::timeout(timeout, self.transport.send(&request)) => {
                result.unwrap_or(Err(DeliveryError::Timeout(timeout)))
            }
        };

        match result {
            Ok(status) => {
                self.registry.record_success(&subscription.id);
                attempt.state = DeliveryState::Delivered;
                attempt.last_status = Some(status);
                attempt.last_error = None;
                self.ledger.sync(attempt);
                Step::Done(DeliveryOutcome::Delivered {
                    attempt: attempt.clone(),
                })
            }
            Err(error)
                if error.is_retryable()
                    && self.config.retry.has_attempts_remaining(attempt.attempt_count) =>
            {
                let delay = self.config.retry.backoff(attempt.attempt_count);
                attempt.state = DeliveryState::Retrying;
                attempt.last_status = error.status();
                attempt.last_error = Some(error.to_string());
                self.ledger.sync(attempt);
                debug!(
                    delivery_id = %attempt.delivery_id,
                    subscription_id = %subscription.id,
                    attempt = attempt.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Webhook attempt failed, retrying"
                );
                Step::Retry(delay)
            }
            Err(error) => {
                let reason = if error.is_retryable() {
                    FailureReason::AttemptsExhausted { last_error: error }
                } else {
                    FailureReason::NonRetryable { error }
                };
                self.registry.record_failure(&subscription.id);
                Step::Done(self.failed(attempt.clone(), reason))
            }
        }
    }

    fn failed(&self, mut attempt: DeliveryAttempt, reason: FailureReason) -> DeliveryOutcome {
        match &reason {
            FailureReason::AttemptsExhausted { last_error: e }
            | FailureReason::NonRetryable { error: e } => {
                attempt.last_status = e.status().or(attempt.last_status);
                attempt.last_error = Some(e.to_string());
            }
            FailureReason::SubscriptionUnhealthy | FailureReason::BacklogFull => {
                attempt.last_error = Some(reason.to_string());
            }
        }
        attempt.state = DeliveryState::Failed;
        self.ledger.sync(&mut attempt);

        let error = PermanentDeliveryError {
            delivery_id: attempt.delivery_id.clone(),
            subscription_id: attempt.subscription_id.clone(),
            event_id: attempt.event_id.clone(),
            attempts: attempt.attempt_count,
            reason,
        };
        DeliveryOutcome::Failed { attempt, error }
    }

    fn cancelled(&self, mut attempt: DeliveryAttempt) -> DeliveryOutcome {
        attempt.state = DeliveryState::Cancelled;
        self.ledger.sync(&mut attempt);
        DeliveryOutcome::Cancelled { attempt }
    }

    fn report(&self, outcome: &DeliveryOutcome) {
        let attempt = outcome.attempt();
        match outcome {
            DeliveryOutcome::Delivered { .. } => info!(
                delivery_id = %attempt.delivery_id,
                subscription_id = %attempt.subscription_id,
                event_id = %attempt.event_id,
                attempts = attempt.attempt_count,
                "Webhook delivered"
            ),
            DeliveryOutcome::Failed { error, .. } => error!(
                delivery_id = %attempt.delivery_id,
                subscription_id = %attempt.subscription_id,
                event_id = %attempt.event_id,
                attempts = error.attempts,
                reason = error.reason.code(),
                error = %error,
                "Webhook delivery failed permanently"
            ),
            DeliveryOutcome::Cancelled { .. } => info!(
                delivery_id = %attempt.delivery_id,
                subscription_id = %attempt.subscription_id,
                event_id = %attempt.event_id,
                "Webhook delivery cancelled"
            ),
        }
    }
}

fn render_request(
    event: &CanonicalIncidentEvent,
    subscription: &WebhookSubscription,
    delivery_id: &str,
) -> Result<WebhookRequest, DeliveryError> {
    let envelope = WebhookEnvelope::new(event, delivery_id, OffsetDateTime::now_utc());
    let body = envelope
        .to_body()
        .map_err(|e| DeliveryError::Payload(e.to_string()))?;
    let signature = signature_header(body.as_bytes(), subscription.secret.expose())
        .map_err(|e| DeliveryError::Payload(e.to_string()))?;

    Ok(WebhookRequest {
        url: subscription.url.clone(),
        body,
        delivery_id: delivery_id.to_string(),
        event_type: event.event_type.clone(),
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::signing::verify_signature;
    use crate::types::SubscriptionHealth;
    use interop_core::IncidentSource;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use time::macros::datetime;

    /// Scripted transport: pops one response per call, repeats the last.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<u16, DeliveryError>>>,
        calls: AtomicU32,
        delay: Duration,
        requests: Mutex<Vec<WebhookRequest>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<u16, DeliveryError>>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(script: Vec<Result<u16, DeliveryError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                delay,
                requests: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, request: &WebhookRequest) -> Result<u16, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap_or(Ok(200))
            } else {
                script.front().cloned().unwrap_or(Ok(200))
            }
        }
    }

    fn config() -> WebhookConfig {
        WebhookConfig {
            unhealthy_threshold: 2,
            retry: RetryPolicy::fixed(Duration::from_millis(5), 3),
            ..WebhookConfig::default()
        }
    }

    fn event(incident_id: &str) -> Arc<CanonicalIncidentEvent> {
        Arc::new(
            CanonicalIncidentEvent::builder(IncidentSource::FireEms, "fire_incident", incident_id)
                .location(29.3759, 47.9774)
                .timestamp(datetime!(2026-01-16 10:30:00 UTC))
                .build()
                .unwrap(),
        )
    }

    fn setup(
        config: WebhookConfig,
        transport: Arc<ScriptedTransport>,
    ) -> (WebhookDispatcher, WebhookSubscription) {
        let registry = Arc::new(SubscriptionRegistry::new(
            config.unhealthy_threshold,
            config.per_subscription_concurrency,
        ));
        let subscription = registry
            .subscribe("dashboard", "https://example.com/hook", ["fire_incident"], "secret")
            .unwrap();
        (WebhookDispatcher::new(config, registry, transport), subscription)
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<DeliveryOutcome>) -> DeliveryOutcome {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("outcome in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_delivers_signed_envelope() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let (dispatcher, subscription) = setup(config(), transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        let scheduled = dispatcher.dispatch(event("FIRE-2026-001"));
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].state, DeliveryState::Pending);

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.state(), DeliveryState::Delivered);
        assert_eq!(outcome.attempt().attempt_count, 1);
        assert_eq!(outcome.attempt().last_status, Some(200));

        let requests = transport.requests.lock().clone();
        let request = &requests[0];
        assert_eq!(request.url, subscription.url);
        assert!(verify_signature(request.body.as_bytes(), "secret", &request.signature));
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["incident"]["incident_id"], "FIRE-2026-001");
        assert_eq!(body["delivery_id"], scheduled[0].delivery_id.as_str());

        let recorded = dispatcher.delivery(&scheduled[0].delivery_id).unwrap();
        assert_eq!(recorded.state, DeliveryState::Delivered);
    }

    #[tokio::test]
    async fn test_no_subscribers_schedules_nothing() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let (dispatcher, _) = setup(config(), transport.clone());

        let mut complaint = (*event("C-1")).clone();
        complaint.event_type = "complaint".into();
        assert!(dispatcher.dispatch(Arc::new(complaint)).is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            Err(DeliveryError::HttpStatus {
                status: 503,
                body: String::new(),
            }),
            Err(DeliveryError::Network("connection reset".into())),
            Ok(204),
        ]);
        let (dispatcher, subscription) = setup(config(), transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        dispatcher.dispatch(event("FIRE-1"));
        let outcome = next_outcome(&mut outcomes).await;

        assert_eq!(outcome.state(), DeliveryState::Delivered);
        assert_eq!(outcome.attempt().attempt_count, 3);
        assert_eq!(transport.calls(), 3);

        let requests = transport.requests.lock().clone();
        for request in &requests {
            assert!(verify_signature(request.body.as_bytes(), "secret", &request.signature));
        }
        let current = dispatcher.registry().get(&subscription.id).unwrap();
        assert_eq!(current.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_permanently() {
        let transport = ScriptedTransport::new(vec![Err(DeliveryError::HttpStatus {
            status: 500,
            body: "boom".into(),
        })]);
        let (dispatcher, subscription) = setup(config(), transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        dispatcher.dispatch(event("FIRE-1"));
        let DeliveryOutcome::Failed { attempt, error } = next_outcome(&mut outcomes).await else {
            panic!("expected failure");
        };

        assert_eq!(transport.calls(), 3);
        assert_eq!(attempt.attempt_count, 3);
        assert_eq!(attempt.last_status, Some(500));
        assert_eq!(error.attempts, 3);
        assert_eq!(error.reason.code(), "attempts_exhausted");
        assert_eq!(error.subscription_id, subscription.id);
        assert_eq!(
            dispatcher.registry().get(&subscription.id).unwrap().consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(DeliveryError::HttpStatus {
            status: 410,
            body: "gone".into(),
        })]);
        let (dispatcher, _) = setup(config(), transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        dispatcher.dispatch(event("FIRE-1"));
        let DeliveryOutcome::Failed { error, .. } = next_outcome(&mut outcomes).await else {
            panic!("expected failure");
        };
        assert_eq!(transport.calls(), 1);
        assert_eq!(error.reason.code(), "non_retryable");
    }

    #[tokio::test]
    async fn test_repeated_failures_open_circuit_breaker() {
        let transport = ScriptedTransport::new(vec![Err(DeliveryError::HttpStatus {
            status: 400,
            body: String::new(),
        })]);
        let (dispatcher, subscription) = setup(config(), transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        dispatcher.dispatch(event("FIRE-1"));
        next_outcome(&mut outcomes).await;
        dispatcher.dispatch(event("FIRE-2"));
        next_outcome(&mut outcomes).await;

        let current = dispatcher.registry().get(&subscription.id).unwrap();
        assert_eq!(current.health, SubscriptionHealth::Unhealthy);
        assert!(dispatcher.dispatch(event("FIRE-3")).is_empty());
        assert_eq!(transport.calls(), 2);

        dispatcher.registry().reactivate(&subscription.id).unwrap();
        assert_eq!(dispatcher.dispatch(event("FIRE-4")).len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_cancels_in_flight_delivery() {
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_secs(30));
        let (dispatcher, subscription) = setup(config(), transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        let scheduled = dispatcher.dispatch(event("FIRE-1"));
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        dispatcher.registry().revoke(&subscription.id).unwrap();

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.state(), DeliveryState::Cancelled);
        assert_eq!(
            dispatcher.delivery(&scheduled[0].delivery_id).unwrap().state,
            DeliveryState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_per_subscription_concurrency_is_bounded() {
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_millis(20));
        let config = WebhookConfig {
            per_subscription_concurrency: 2,
            ..config()
        };
        let (dispatcher, _) = setup(config, transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        for i in 0..6 {
            dispatcher.dispatch(event(&format!("FIRE-{i}")));
        }
        for _ in 0..6 {
            assert_eq!(next_outcome(&mut outcomes).await.state(), DeliveryState::Delivered);
        }
        assert_eq!(transport.calls(), 6);
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_after_grace() {
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_secs(30));
        let (dispatcher, _) = setup(config(), transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        dispatcher.dispatch(event("FIRE-1"));
        let drained = dispatcher.shutdown(Duration::from_millis(50)).await;

        assert!(!drained);
        assert_eq!(next_outcome(&mut outcomes).await.state(), DeliveryState::Cancelled);
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(dispatcher.dispatch(event("FIRE-2")).is_empty());
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_secs(30));
        let config = WebhookConfig {
            attempt_timeout: Duration::from_millis(20),
            retry: RetryPolicy::no_retry(),
            ..config()
        };
        let (dispatcher, _) = setup(config, transport);
        let mut outcomes = dispatcher.subscribe_outcomes();

        dispatcher.dispatch(event("FIRE-1"));
        let DeliveryOutcome::Failed { error, .. } = next_outcome(&mut outcomes).await else {
            panic!("expected failure");
        };
        assert_eq!(
            error.reason,
            FailureReason::AttemptsExhausted {
                last_error: DeliveryError::Timeout(Duration::from_millis(20))
            }
        );
    }

    #[tokio::test]
    async fn test_full_backlog_refuses_new_deliveries() {
        let transport = ScriptedTransport::with_delay(vec![Ok(200)], Duration::from_millis(50));
        let config = WebhookConfig {
            max_concurrency: 2,
            per_subscription_concurrency: 2,
            max_pending_deliveries: 2,
            ..config()
        };
        let (dispatcher, subscription) = setup(config, transport.clone());
        let mut outcomes = dispatcher.subscribe_outcomes();

        let states: Vec<DeliveryState> = (1..=3)
            .flat_map(|i| dispatcher.dispatch(event(&format!("FIRE-{i}"))))
            .map(|a| a.state)
            .collect();
        assert_eq!(
            states,
            vec![DeliveryState::Pending, DeliveryState::Pending, DeliveryState::Failed]
        );
        assert_eq!(dispatcher.backlog_rejections(), 1);

        let DeliveryOutcome::Failed { attempt, error } = next_outcome(&mut outcomes).await else {
            panic!("expected the refused delivery first");
        };
        assert_eq!(error.reason, FailureReason::BacklogFull);
        assert_eq!(error.reason.code(), "backlog_full");
        assert_eq!(attempt.attempt_count, 0);
        for _ in 0..2 {
            assert_eq!(next_outcome(&mut outcomes).await.state(), DeliveryState::Delivered);
        }
        assert_eq!(transport.calls(), 2);
        // Refusals are not the receiver's fault.
        let current = dispatcher.registry().get(&subscription.id).unwrap();
        assert_eq!(current.consecutive_failures, 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let scheduled = dispatcher.dispatch(event("FIRE-4"));
        assert_eq!(scheduled[0].state, DeliveryState::Pending);
        dispatcher.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_ledger_is_bounded() {
        let transport = ScriptedTransport::new(vec![Ok(200)]);
        let config = WebhookConfig {
            ledger_capacity: 2,
            ..config()
        };
        let (dispatcher, subscription) = setup(config, transport);

        let first = dispatcher.dispatch(event("FIRE-1"));
        dispatcher.dispatch(event("FIRE-2"));
        dispatcher.dispatch(event("FIRE-3"));

        assert!(dispatcher.delivery(&first[0].delivery_id).is_none());
        assert_eq!(dispatcher.deliveries_for(&subscription.id).len(), 2);
        dispatcher.shutdown(Duration::from_secs(5)).await;
    }
}
