//! Consumer registry and per-consumer delivery workers.
//!
//! Every registered consumer owns a bounded queue and a worker task.
//! Fan-out only pushes onto queues, so publishing never waits for a
//! consumer, and one slow consumer only delays its own backlog. An event
//! that finds a consumer's queue full is dropped for that consumer alone,
//! counted in `dropped` and logged.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::BrokerSettings;
use super::consumer::{ConsumerError, EventConsumer};
use crate::error::{CoreError, Result};
use crate::model::CanonicalIncidentEvent;

type EventQueue = mpsc::Sender<Arc<CanonicalIncidentEvent>>;

/// Delivery counters for one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub name: String,
    pub delivered: u64,
    pub retried: u64,
    pub failed: u64,
    pub pending: u64,
    /// Events not queued because the queue was full.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    pending: AtomicU64,
    dropped: AtomicU64,
}

struct ConsumerHandle {
    consumer: Arc<dyn EventConsumer>,
    queue: EventQueue,
    counters: Arc<Counters>,
}

impl ConsumerHandle {
    fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            name: self.consumer.name().to_string(),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pending: self.counters.pending.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Registry of event consumers with lifecycle management.
pub struct ConsumerRegistry {
    /// Snapshot read on every fan-out.
    consumers: ArcSwap<Vec<Arc<ConsumerHandle>>>,
    /// Serializes register/unregister and owns the worker handles.
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
    settings: BrokerSettings,
}

impl ConsumerRegistry {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            consumers: ArcSwap::from_pointee(Vec::new()),
            workers: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Register a consumer and start its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn register(&self, consumer: Arc<dyn EventConsumer>) -> Result<()> {
        let name = consumer.name().to_string();
        if self.workers.lock().contains_key(&name) {
            return Err(CoreError::DuplicateConsumer(name));
        }

        if let Err(e) = consumer.on_start().await {
            warn!(consumer = %name, error = %e, "Consumer on_start failed");
        }

        let (queue, receiver) = mpsc::channel(self.settings.consumer_queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let handle = Arc::new(ConsumerHandle {
            consumer: consumer.clone(),
            queue,
            counters: counters.clone(),
        });

        let mut workers = self.workers.lock();
        if workers.contains_key(&name) {
            return Err(CoreError::DuplicateConsumer(name));
        }
        let worker = tokio::spawn(run_worker(
            consumer,
            receiver,
            counters,
            self.settings.clone(),
        ));
        workers.insert(name.clone(), worker);

        let mut next = Vec::clone(&self.consumers.load());
        next.push(handle);
        self.consumers.store(Arc::new(next));

        debug!(consumer = %name, "Registered event consumer");
        Ok(())
    }

    /// Remove a consumer. Its worker drains the already queued events and stops.
    pub fn unregister(&self, name: &str) -> bool {
        let mut workers = self.workers.lock();
        if workers.remove(name).is_none() {
            return false;
        }
        let next: Vec<_> = self
            .consumers
            .load()
            .iter()
            .filter(|h| h.consumer.name() != name)
            .cloned()
            .collect();
        self.consumers.store(Arc::new(next));
        debug!(consumer = %name, "Unregistered event consumer");
        true
    }

    /// Queue an event for every matching consumer.
    ///
    /// Returns the number of consumers the event was queued for.
    pub fn fan_out(&self, event: &Arc<CanonicalIncidentEvent>) -> usize {
        let consumers = self.consumers.load();
        let mut queued = 0;

        for handle in consumers.iter() {
            if !handle.consumer.matches(event) {
                continue;
            }
            handle.counters.pending.fetch_add(1, Ordering::Relaxed);
            match handle.queue.try_send(event.clone()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    handle.counters.pending.fetch_sub(1, Ordering::Relaxed);
                    let dropped = handle.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        consumer = handle.consumer.name(),
                        event_id = %event.event_id,
                        incident_id = %event.incident_id,
                        capacity = self.settings.consumer_queue_capacity,
                        dropped,
                        "Consumer queue full, event dropped for this consumer"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    handle.counters.pending.fetch_sub(1, Ordering::Relaxed);
                    warn!(
                        consumer = handle.consumer.name(),
                        event_id = %event.event_id,
                        "Consumer worker stopped, event not queued"
                    );
                }
            }
        }

        queued
    }

    /// Get the number of registered consumers.
    pub fn consumer_count(&self) -> usize {
        self.consumers.load().len()
    }

    pub fn stats(&self) -> Vec<ConsumerStats> {
        self.consumers.load().iter().map(|h| h.stats()).collect()
    }

    /// Close every queue and wait for workers to drain.
    pub async fn shutdown(&self) {
        let workers: Vec<(String, JoinHandle<()>)> = {
            let mut workers = self.workers.lock();
            self.consumers.store(Arc::new(Vec::new()));
            workers.drain().collect()
        };

        for (name, worker) in workers {
            match tokio::time::timeout(self.settings.shutdown_timeout, worker).await {
                Ok(Ok(())) => debug!(consumer = %name, "Consumer worker stopped"),
                Ok(Err(e)) => error!(consumer = %name, error = %e, "Consumer worker crashed"),
                Err(_) => warn!(
                    consumer = %name,
                    timeout_secs = self.settings.shutdown_timeout.as_secs(),
                    "Consumer worker did not drain before shutdown timeout"
                ),
            }
        }
        info!("Consumer registry shut down");
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("consumer_count", &self.consumer_count())
            .field("settings", &self.settings)
            .finish()
    }
}

async fn run_worker(
    consumer: Arc<dyn EventConsumer>,
    mut receiver: mpsc::Receiver<Arc<CanonicalIncidentEvent>>,
    counters: Arc<Counters>,
    settings: BrokerSettings,
) {
    let name = consumer.name().to_string();
    debug!(consumer = %name, "Consumer worker started");

    while let Some(event) = receiver.recv().await {
        deliver(consumer.as_ref(), event, &counters, &settings).await;
        counters.pending.fetch_sub(1, Ordering::Relaxed);
    }

    if let Err(e) = consumer.on_shutdown().await {
        warn!(consumer = %name, error = %e, "Consumer on_shutdown failed");
    }
}

async fn deliver(
    consumer: &dyn EventConsumer,
    event: Arc<CanonicalIncidentEvent>,
    counters: &Counters,
    settings: &BrokerSettings,
) {
    let max_attempts = settings.consumer_max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match invoke(consumer, event.clone(), settings).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    consumer = consumer.name(),
                    event_id = %event.event_id,
                    attempt,
                    "Event delivered to consumer"
                );
                return;
            }
            Err(e) if attempt < max_attempts => {
                counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    consumer = consumer.name(),
                    event_id = %event.event_id,
                    attempt,
                    error = %e,
                    "Consumer failed, retrying"
                );
                tokio::time::sleep(settings.consumer_retry_delay * attempt).await;
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    consumer = consumer.name(),
                    event_id = %event.event_id,
                    incident_id = %event.incident_id,
                    attempts = max_attempts,
                    error = %e,
                    "Consumer failed permanently, event dropped for this consumer"
                );
            }
        }
    }
}

/// Run one `handle` call with timeout and panic protection.
async fn invoke(
    consumer: &dyn EventConsumer,
    event: Arc<CanonicalIncidentEvent>,
    settings: &BrokerSettings,
) -> std::result::Result<(), ConsumerError> {
    let timeout = settings.consumer_timeout;
    let result = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(consumer.handle(event)).catch_unwind(),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => {
            let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            Err(ConsumerError::Panicked(panic_msg))
        }
        Err(_) => Err(ConsumerError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IncidentSource;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use time::macros::datetime;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            consumer_timeout: Duration::from_millis(200),
            consumer_max_attempts: 3,
            consumer_retry_delay: Duration::from_millis(5),
            ..BrokerSettings::default()
        }
    }

    fn event(id: &str) -> Arc<CanonicalIncidentEvent> {
        Arc::new(
            CanonicalIncidentEvent::builder(IncidentSource::FireEms, "fire_incident", id)
                .location(29.0, 48.0)
                .timestamp(datetime!(2026-01-16 10:30:00 UTC))
                .build()
                .unwrap(),
        )
    }

    struct CountingConsumer {
        name: &'static str,
        count: AtomicU32,
    }

    impl CountingConsumer {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                count: AtomicU32::new(0),
            }
        }

        fn count(&self) -> u32 {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventConsumer for CountingConsumer {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(
            &self,
            _event: Arc<CanonicalIncidentEvent>,
        ) -> std::result::Result<(), ConsumerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyConsumer {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventConsumer for FlakyConsumer {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn handle(
            &self,
            _event: Arc<CanonicalIncidentEvent>,
        ) -> std::result::Result<(), ConsumerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ConsumerError::storage("database unavailable"))
            } else {
                Ok(())
            }
        }
    }

    struct PanicConsumer;

    #[async_trait]
    impl EventConsumer for PanicConsumer {
        fn name(&self) -> &str {
            "panic_consumer"
        }

        async fn handle(
            &self,
            _event: Arc<CanonicalIncidentEvent>,
        ) -> std::result::Result<(), ConsumerError> {
            panic!("This consumer panics!");
        }
    }

    struct StuckConsumer;

    #[async_trait]
    impl EventConsumer for StuckConsumer {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn handle(
            &self,
            _event: Arc<CanonicalIncidentEvent>,
        ) -> std::result::Result<(), ConsumerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registry_register_and_duplicate_name() {
        let registry = ConsumerRegistry::new(settings());
        assert_eq!(registry.consumer_count(), 0);

        registry
            .register(Arc::new(CountingConsumer::new("storage")))
            .await
            .unwrap();
        assert_eq!(registry.consumer_count(), 1);

        let err = registry
            .register(Arc::new(CountingConsumer::new("storage")))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateConsumer(name) if name == "storage"));
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_consumer() {
        let registry = ConsumerRegistry::new(settings());
        let a = Arc::new(CountingConsumer::new("a"));
        let b = Arc::new(CountingConsumer::new("b"));
        registry.register(a.clone()).await.unwrap();
        registry.register(b.clone()).await.unwrap();

        assert_eq!(registry.fan_out(&event("F-1")), 2);
        assert_eq!(registry.fan_out(&event("F-2")), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 2);
    }

    #[tokio::test]
    async fn test_failed_consumer_is_retried() {
        let registry = ConsumerRegistry::new(settings());
        let flaky = Arc::new(FlakyConsumer {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        registry.register(flaky.clone()).await.unwrap();

        registry.fan_out(&event("F-1"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        let stats = &registry.stats()[0];
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_panic_isolation() {
        let registry = ConsumerRegistry::new(settings());
        let counter = Arc::new(CountingConsumer::new("counter"));
        registry.register(Arc::new(PanicConsumer)).await.unwrap();
        registry.register(counter.clone()).await.unwrap();

        registry.fan_out(&event("F-1"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(counter.count(), 1);
        let panic_stats = registry
            .stats()
            .into_iter()
            .find(|s| s.name == "panic_consumer")
            .unwrap();
        assert_eq!(panic_stats.failed, 1);
    }

    #[tokio::test]
    async fn test_slow_consumer_does_not_block_others() {
        let registry = ConsumerRegistry::new(settings());
        let counter = Arc::new(CountingConsumer::new("counter"));
        registry.register(Arc::new(StuckConsumer)).await.unwrap();
        registry.register(counter.clone()).await.unwrap();

        for i in 0..5 {
            registry.fan_out(&event(&format!("F-{i}")));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(counter.count(), 5);
        let stuck = registry
            .stats()
            .into_iter()
            .find(|s| s.name == "stuck")
            .unwrap();
        assert!(stuck.pending >= 4);
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_consumer_only() {
        let registry = ConsumerRegistry::new(BrokerSettings {
            consumer_queue_capacity: 2,
            ..settings()
        });
        let counter = Arc::new(CountingConsumer::new("counter"));
        registry.register(Arc::new(StuckConsumer)).await.unwrap();
        registry.register(counter.clone()).await.unwrap();

        // Workers have not been polled yet, so each queue holds exactly two.
        let queued: usize = (0..5)
            .map(|i| registry.fan_out(&event(&format!("F-{i}"))))
            .sum();
        assert_eq!(queued, 4);

        let stats = registry.stats();
        let stuck = stats.iter().find(|s| s.name == "stuck").unwrap();
        assert_eq!(stuck.dropped, 3);
        assert_eq!(stuck.pending, 2);
        let counting = stats.iter().find(|s| s.name == "counter").unwrap();
        assert_eq!(counting.dropped, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.count(), 2);

        // Once drained, the counting consumer accepts new events again.
        registry.fan_out(&event("F-9"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.count(), 3);
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let registry = ConsumerRegistry::new(settings());
        let counter = Arc::new(CountingConsumer::new("counter"));
        registry.register(counter.clone()).await.unwrap();

        assert!(registry.unregister("counter"));
        assert!(!registry.unregister("counter"));
        assert_eq!(registry.fan_out(&event("F-1")), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queues() {
        let registry = ConsumerRegistry::new(settings());
        let counter = Arc::new(CountingConsumer::new("counter"));
        registry.register(counter.clone()).await.unwrap();

        for i in 0..10 {
            registry.fan_out(&event(&format!("F-{i}")));
        }
        registry.shutdown().await;

        assert_eq!(counter.count(), 10);
        assert_eq!(registry.consumer_count(), 0);
    }
}
