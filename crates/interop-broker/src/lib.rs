//! Incident ingestion broker.
//!
//! Wires the source adapters, event broker, API key authentication, rate
//! limiting and webhook delivery into one [`InteropSystem`].

pub mod audit;
pub mod config;
pub mod gateway;
pub mod manager;
pub mod observability;
pub mod system;

pub use audit::{AuditAction, AuditEntry, AuditTrail};
pub use config::{AuditConfig, BrokerConfig, ConfigError, LoggingConfig};
pub use gateway::{IngestError, IngestionGateway};
pub use manager::InteropManager;
pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level};
pub use system::{InteropSystem, StartupError};

pub use interop_adapters::{IngestOutcome, RecordKind, ValidationError};
pub use interop_auth::{AuthError, IssuedApiKey, Permission, ServiceInfo};
pub use interop_core::{CanonicalIncidentEvent, EventConsumer, IncidentSource};
pub use interop_notifications::{DeliveryOutcome, DeliveryState, WebhookSubscription};
