pub mod error;
pub mod events;
pub mod id;
pub mod model;
pub mod time;

pub use error::{CoreError, ErrorCategory, Result};
pub use events::{
    BrokerSettings, ConsumerError, ConsumerStats, EventBroker, EventConsumer, PublishResult,
};
pub use id::generate_id;
pub use model::{
    CanonicalIncidentEvent, DEFAULT_DESCRIPTION, DEFAULT_GOVERNORATE, DEFAULT_SEVERITY,
    DEFAULT_ZONE, DedupeKey, IncidentSource, StandardIncident,
};
pub use time::{IncidentTimestamp, now_utc, parse_timestamp};
