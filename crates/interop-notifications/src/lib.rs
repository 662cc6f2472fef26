//! Outbound webhook notifications for accepted incident events.
//!
//! - [`SubscriptionRegistry`] stores subscriptions and their circuit breakers
//! - [`WebhookDispatcher`] is registered as a broker consumer and delivers
//!   signed envelopes with bounded retries
//! - [`signing`] holds the HMAC helpers receivers use to verify payloads

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod retry;
pub mod signing;
pub mod transport;
pub mod types;

pub use config::WebhookConfig;
pub use dispatcher::{DISPATCHER_NAME, DeliveryOutcome, WebhookDispatcher};
pub use error::{DeliveryError, FailureReason, NotificationError, PermanentDeliveryError};
pub use registry::{DeliveryTarget, SubscriptionRegistry};
pub use retry::RetryPolicy;
pub use signing::{
    DELIVERY_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER, sign_payload, signature_header,
    verify_signature,
};
pub use transport::{HttpTransport, WebhookRequest, WebhookTransport};
pub use types::{
    DeliveryAttempt, DeliveryState, SubscriptionHealth, WebhookEnvelope, WebhookSecret,
    WebhookSubscription,
};
