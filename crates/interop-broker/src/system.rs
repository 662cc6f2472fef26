//! Process-wide wiring.
//!
//! ```text
//!   agencies ──► IngestionGateway ──► AdapterSet ──► EventBroker
//!                     │                                  │ fan-out
//!                InteropManager                          ├──► WebhookDispatcher ──► subscribers
//!             (keys, quotas, hooks)                      └──► registered consumers
//!                     │                                          │
//!                     └──────────────► AuditTrail ◄──── delivery outcomes
//! ```

use std::sync::Arc;

use interop_adapters::AdapterSet;
use interop_core::{CoreError, EventBroker, EventConsumer};
use interop_notifications::{
    HttpTransport, NotificationError, SubscriptionRegistry, WebhookDispatcher, WebhookTransport,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::AuditTrail;
use crate::config::{BrokerConfig, ConfigError};
use crate::gateway::IngestionGateway;
use crate::manager::InteropManager;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("webhook setup failed: {0}")]
    Notifications(#[from] NotificationError),

    #[error("consumer registration failed: {0}")]
    Consumer(#[from] CoreError),
}

/// Running broker with every component it owns.
pub struct InteropSystem {
    config: BrokerConfig,
    broker: Arc<EventBroker>,
    dispatcher: WebhookDispatcher,
    manager: Arc<InteropManager>,
    gateway: Arc<IngestionGateway>,
    audit: Arc<AuditTrail>,
    audit_stop: CancellationToken,
    audit_listener: Mutex<Option<JoinHandle<()>>>,
}

impl InteropSystem {
    /// Build and start the system with the reqwest webhook transport.
    pub async fn start(config: BrokerConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let transport = HttpTransport::new(&config.webhooks)?;
        Self::start_with_transport(config, Arc::new(transport)).await
    }

    /// Build and start the system with a custom webhook transport.
    pub async fn start_with_transport(
        config: BrokerConfig,
        transport: Arc<dyn WebhookTransport>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let broker = EventBroker::new_shared(config.broker.clone());
        let audit = Arc::new(AuditTrail::new(config.audit.capacity));
        let registry = Arc::new(SubscriptionRegistry::new(
            config.webhooks.unhealthy_threshold,
            config.webhooks.per_subscription_concurrency,
        ));

        let dispatcher =
            WebhookDispatcher::new(config.webhooks.clone(), registry.clone(), transport);
        broker.register(Arc::new(dispatcher.clone())).await?;

        let audit_stop = CancellationToken::new();
        let audit_listener =
            audit.spawn_delivery_listener(dispatcher.subscribe_outcomes(), audit_stop.clone());

        let manager = Arc::new(InteropManager::new(&config.auth, registry, audit.clone()));
        let gateway = Arc::new(IngestionGateway::new(
            manager.clone(),
            AdapterSet::new(broker.clone()),
            audit.clone(),
        ));

        info!(
            dedupe_window_secs = config.broker.dedupe_window.as_secs(),
            webhook_max_concurrency = config.webhooks.max_concurrency,
            rate_limiting = config.auth.rate_limiting.enabled,
            "Interop system started"
        );

        Ok(Self {
            config,
            broker,
            dispatcher,
            manager,
            gateway,
            audit,
            audit_stop,
            audit_listener: Mutex::new(Some(audit_listener)),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    pub fn dispatcher(&self) -> &WebhookDispatcher {
        &self.dispatcher
    }

    pub fn manager(&self) -> &Arc<InteropManager> {
        &self.manager
    }

    pub fn gateway(&self) -> &Arc<IngestionGateway> {
        &self.gateway
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// Add an internal listener, such as the storage collaborator.
    pub async fn register_consumer(
        &self,
        consumer: Arc<dyn EventConsumer>,
    ) -> Result<(), StartupError> {
        self.broker.register(consumer).await?;
        Ok(())
    }

    /// Periodic maintenance: expired dedupe markers and idle rate windows.
    pub fn prune_expired(&self) -> usize {
        let markers = self.broker.prune_expired();
        let windows = self.manager.prune_rate_windows();
        if markers > 0 || windows > 0 {
            info!(markers, windows, "Pruned expired state");
        }
        markers
    }

    /// Drain consumers, finish or cancel webhook deliveries and stop the
    /// audit listener.
    pub async fn shutdown(&self) {
        self.broker.shutdown().await;

        let drained = self
            .dispatcher
            .shutdown(self.config.broker.shutdown_timeout)
            .await;
        if !drained {
            warn!("Some webhook deliveries were cancelled at shutdown");
        }

        // Outcomes already queued are recorded before the listener stops.
        self.audit_stop.cancel();
        let listener = self.audit_listener.lock().take();
        if let Some(listener) = listener
            && let Err(e) = listener.await
        {
            warn!(error = %e, "Audit listener stopped abnormally");
        }

        info!("Interop system shut down");
    }
}

impl std::fmt::Debug for InteropSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteropSystem")
            .field("broker", &self.broker)
            .field("dispatcher", &self.dispatcher)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}
