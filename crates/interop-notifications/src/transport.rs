//! HTTP transport for signed webhook requests.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, header};
use url::Url;

use crate::config::WebhookConfig;
use crate::error::{DeliveryError, NotificationError};
use crate::signing::{DELIVERY_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER};

/// Longest error response body kept in a `DeliveryError`.
const MAX_ERROR_BODY: usize = 512;

/// One signed POST to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: Url,
    pub body: String,
    pub delivery_id: String,
    pub event_type: String,
    /// Full `X-Signature-256` value, `sha256=<hex>`.
    pub signature: String,
}

/// Sends webhook requests; returns the 2xx status on success.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: &WebhookRequest) -> Result<u16, DeliveryError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(config.attempt_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| NotificationError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &WebhookRequest) -> Result<u16, DeliveryError> {
        let start = Instant::now();

        let response = self
            .client
            .post(request.url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, request.signature.as_str())
            .header(DELIVERY_ID_HEADER, request.delivery_id.as_str())
            .header(EVENT_TYPE_HEADER, request.event_type.as_str())
            .body(request.body.clone())
            .send()
            .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    tracing::debug!(
                        delivery_id = %request.delivery_id,
                        url = %request.url,
                        status,
                        elapsed_ms,
                        "Webhook delivered"
                    );
                    return Ok(status);
                }

                let mut body = resp.text().await.unwrap_or_default();
                truncate(&mut body, MAX_ERROR_BODY);
                tracing::warn!(
                    delivery_id = %request.delivery_id,
                    url = %request.url,
                    status,
                    elapsed_ms,
                    "Webhook delivery failed with HTTP error"
                );
                Err(DeliveryError::HttpStatus { status, body })
            }
            Err(e) => {
                tracing::warn!(
                    delivery_id = %request.delivery_id,
                    url = %request.url,
                    error = %e,
                    elapsed_ms,
                    "Webhook delivery failed with network error"
                );
                if e.is_timeout() {
                    Err(DeliveryError::Timeout(start.elapsed()))
                } else {
                    Err(DeliveryError::Network(e.to_string()))
                }
            }
        }
    }
}

fn truncate(body: &mut String, max: usize) {
    if body.len() <= max {
        return;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
}
