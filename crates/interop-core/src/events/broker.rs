//! Event broker: deduplication and fan-out of canonical events.
//!
//! The `EventBroker` is the single hub every adapter publishes into. It
//! owns the dedupe index and the consumer registry, and exposes a lossy
//! broadcast tap for best-effort observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::BrokerSettings;
use super::consumer::EventConsumer;
use super::registry::{ConsumerRegistry, ConsumerStats};
use crate::error::Result;
use crate::model::{CanonicalIncidentEvent, DedupeKey, IncidentSource};

/// Buffer size for the broadcast tap.
/// Observers that fall further behind than this miss events.
const TAP_BUFFER_SIZE: usize = 1024;

/// Outcome of publishing a canonical event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// First submission of this dedupe key; queued for `consumers` consumers.
    Accepted { event_id: String, consumers: usize },
    /// The dedupe key was already accepted within the dedupe window.
    Duplicate { existing_event_id: String },
}

impl PublishResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn event_id(&self) -> &str {
        match self {
            Self::Accepted { event_id, .. } => event_id,
            Self::Duplicate { existing_event_id } => existing_event_id,
        }
    }
}

struct DedupeRecord {
    event: Arc<CanonicalIncidentEvent>,
    accepted_at: Instant,
}

/// Central pub/sub hub for canonical incident events.
///
/// One broker exists per process; adapters receive it as an `Arc` at
/// construction.
///
/// # Example
///
/// ```ignore
/// let broker = EventBroker::new_shared(BrokerSettings::default());
/// broker.register(Arc::new(storage_consumer)).await?;
///
/// match broker.publish(event) {
///     PublishResult::Accepted { consumers, .. } => { /* queued */ }
///     PublishResult::Duplicate { .. } => { /* resubmission */ }
/// }
/// ```
pub struct EventBroker {
    index: DashMap<DedupeKey, DedupeRecord>,
    consumers: ConsumerRegistry,
    tap: broadcast::Sender<Arc<CanonicalIncidentEvent>>,
    settings: BrokerSettings,
    accepted: AtomicU64,
    duplicates: AtomicU64,
}

impl EventBroker {
    pub fn new(settings: BrokerSettings) -> Self {
        let (tap, _) = broadcast::channel(TAP_BUFFER_SIZE);
        Self {
            index: DashMap::new(),
            consumers: ConsumerRegistry::new(settings.clone()),
            tap,
            settings,
            accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Create a new broker wrapped in an Arc for sharing.
    pub fn new_shared(settings: BrokerSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Publish a canonical event.
    ///
    /// The dedupe check-and-insert happens under the index entry lock, so
    /// concurrent publishers of the same dedupe key produce
    /// exactly one accepted event. Returns as soon as the event is queued
    /// for consumers; it never waits for delivery.
    pub fn publish(&self, event: CanonicalIncidentEvent) -> PublishResult {
        let key = event.dedupe_key();
        let event = Arc::new(event);

        match self.index.entry(key) {
            Entry::Occupied(mut existing) => {
                if existing.get().accepted_at.elapsed() < self.settings.dedupe_window {
                    let existing_event_id = existing.get().event.event_id.clone();
                    self.duplicates.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        source = %event.source,
                        record_kind = %event.record_kind,
                        incident_id = %event.incident_id,
                        existing_event_id = %existing_event_id,
                        "Duplicate submission ignored"
                    );
                    return PublishResult::Duplicate { existing_event_id };
                }
                existing.insert(DedupeRecord {
                    event: event.clone(),
                    accepted_at: Instant::now(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(DedupeRecord {
                    event: event.clone(),
                    accepted_at: Instant::now(),
                });
            }
        }

        self.accepted.fetch_add(1, Ordering::Relaxed);
        let consumers = self.consumers.fan_out(&event);
        let _ = self.tap.send(event.clone());

        debug!(
            event_id = %event.event_id,
            source = %event.source,
            event_type = %event.event_type,
            incident_id = %event.incident_id,
            consumers,
            "Event accepted"
        );

        PublishResult::Accepted {
            event_id: event.event_id.clone(),
            consumers,
        }
    }

    /// Look up an accepted event still inside the dedupe window.
    pub fn get(
        &self,
        source: IncidentSource,
        record_kind: &str,
        incident_id: &str,
    ) -> Option<Arc<CanonicalIncidentEvent>> {
        self.index
            .get(&DedupeKey::new(source, record_kind, incident_id))
            .map(|record| record.event.clone())
    }

    /// Number of dedupe keys currently remembered.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Drop dedupe records older than the dedupe window.
    ///
    /// Returns the number of records removed.
    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now())
    }

    /// Like [`prune_expired`](Self::prune_expired), measuring age against `now`.
    pub fn prune_expired_at(&self, now: Instant) -> usize {
        let window = self.settings.dedupe_window;
        let before = self.index.len();
        self.index
            .retain(|_, record| now.saturating_duration_since(record.accepted_at) < window);
        let removed = before.saturating_sub(self.index.len());
        if removed > 0 {
            debug!(removed, "Pruned expired dedupe records");
        }
        removed
    }

    /// Register a consumer that receives every matching accepted event.
    pub async fn register(&self, consumer: Arc<dyn EventConsumer>) -> Result<()> {
        self.consumers.register(consumer).await
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.consumers.unregister(name)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.consumer_count()
    }

    pub fn consumer_stats(&self) -> Vec<ConsumerStats> {
        self.consumers.stats()
    }

    /// Subscribe to a best-effort live feed of accepted events.
    ///
    /// Unlike registered consumers, tap receivers that lag lose events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CanonicalIncidentEvent>> {
        self.tap.subscribe()
    }

    /// Stop all consumers after their queues drain.
    pub async fn shutdown(&self) {
        info!(
            accepted = self.accepted_count(),
            duplicates = self.duplicate_count(),
            "Shutting down event broker"
        );
        self.consumers.shutdown().await;
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker")
            .field("dedupe_records", &self.len())
            .field("consumer_count", &self.consumer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::consumer::ConsumerError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use time::macros::datetime;

    fn event(id: &str) -> CanonicalIncidentEvent {
        CanonicalIncidentEvent::builder(IncidentSource::FireEms, "fire_incident", id)
            .location(29.3344, 48.0537)
            .timestamp(datetime!(2026-01-16 10:30:00 UTC))
            .build()
            .unwrap()
    }

    #[derive(Default)]
    struct CollectingConsumer {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventConsumer for CollectingConsumer {
        fn name(&self) -> &str {
            "collector"
        }

        async fn handle(
            &self,
            event: Arc<CanonicalIncidentEvent>,
        ) -> std::result::Result<(), ConsumerError> {
            self.seen.lock().push(event.incident_id.clone());
            Ok(())
        }
    }

    #[test]
    fn test_publish_accepts_new_event() {
        let broker = EventBroker::default();
        let result = broker.publish(event("FIRE-1"));

        assert!(result.is_accepted());
        assert_eq!(broker.len(), 1);
        let stored = broker
            .get(IncidentSource::FireEms, "fire_incident", "FIRE-1")
            .unwrap();
        assert_eq!(stored.event_id, result.event_id());
    }

    #[test]
    fn test_publish_detects_duplicate() {
        let broker = EventBroker::default();
        let first = broker.publish(event("FIRE-1"));
        let second = broker.publish(event("FIRE-1"));

        assert!(second.is_duplicate());
        assert_eq!(second.event_id(), first.event_id());
        assert_eq!(broker.len(), 1);
        assert_eq!(broker.accepted_count(), 1);
        assert_eq!(broker.duplicate_count(), 1);
    }

    #[test]
    fn test_same_incident_id_from_other_source_is_distinct() {
        let broker = EventBroker::default();
        broker.publish(event("X-1"));

        let other = CanonicalIncidentEvent::builder(IncidentSource::Traffic, "collision", "X-1")
            .location(29.0, 48.0)
            .timestamp(datetime!(2026-01-16 10:30:00 UTC))
            .build()
            .unwrap();
        assert!(broker.publish(other).is_accepted());
        assert_eq!(broker.len(), 2);
    }

    #[test]
    fn test_same_incident_id_of_other_kind_is_distinct() {
        let broker = EventBroker::default();
        broker.publish(event("F-1"));

        let deployment =
            CanonicalIncidentEvent::builder(IncidentSource::FireEms, "ambulance_deployment", "F-1")
                .location(29.0, 48.0)
                .timestamp(datetime!(2026-01-16 10:30:00 UTC))
                .build()
                .unwrap();
        assert!(broker.publish(deployment).is_accepted());
        assert_eq!(broker.len(), 2);
        assert!(
            broker
                .get(IncidentSource::FireEms, "ambulance_deployment", "F-1")
                .is_some()
        );
    }

    #[test]
    fn test_concurrent_publish_accepts_exactly_one() {
        let broker = Arc::new(EventBroker::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let broker = broker.clone();
                std::thread::spawn(move || broker.publish(event("FIRE-RACE")))
            })
            .collect();

        let results: Vec<PublishResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let accepted = results.iter().filter(|r| r.is_accepted()).count();
        let duplicates = results.iter().filter(|r| r.is_duplicate()).count();

        assert_eq!(accepted, 1);
        assert_eq!(duplicates, 15);
        assert_eq!(broker.len(), 1);
    }

    #[test]
    fn test_expired_dedupe_records_are_pruned() {
        let broker = EventBroker::new(BrokerSettings {
            dedupe_window: Duration::ZERO,
            ..BrokerSettings::default()
        });
        broker.publish(event("FIRE-1"));
        assert_eq!(broker.prune_expired(), 1);
        assert!(broker.is_empty());

        // With a zero window every resubmission is a fresh event.
        assert!(broker.publish(event("FIRE-1")).is_accepted());
        assert!(broker.publish(event("FIRE-1")).is_accepted());
    }

    #[test]
    fn test_prune_keeps_records_inside_window() {
        let broker = EventBroker::new(BrokerSettings {
            dedupe_window: Duration::from_secs(60),
            ..BrokerSettings::default()
        });
        broker.publish(event("FIRE-1"));

        assert_eq!(broker.prune_expired(), 0);
        assert_eq!(broker.len(), 1);
        assert_eq!(
            broker.prune_expired_at(Instant::now() + Duration::from_secs(61)),
            1
        );
        assert!(
            broker
                .get(IncidentSource::FireEms, "fire_incident", "FIRE-1")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_consumers() {
        let broker = EventBroker::default();
        let collector = Arc::new(CollectingConsumer::default());
        broker.register(collector.clone()).await.unwrap();

        let result = broker.publish(event("FIRE-1"));
        assert_eq!(
            result,
            PublishResult::Accepted {
                event_id: result.event_id().to_string(),
                consumers: 1
            }
        );
        broker.publish(event("FIRE-1"));
        broker.publish(event("FIRE-2"));

        broker.shutdown().await;
        assert_eq!(*collector.seen.lock(), vec!["FIRE-1", "FIRE-2"]);
    }

    #[tokio::test]
    async fn test_tap_receives_accepted_events() {
        let broker = EventBroker::default();
        let mut tap = broker.subscribe();

        broker.publish(event("FIRE-1"));
        broker.publish(event("FIRE-1"));

        let received = tap.recv().await.unwrap();
        assert_eq!(received.incident_id, "FIRE-1");
        assert!(tap.try_recv().is_err());
    }
}
