//! Outbound webhook delivery over HTTP.
//!
//! Each delivery is a `POST` of the signed payload, byte-for-byte, with the signature in the `x-signature` header and
//! the event name in `x-event`. Any 2xx response acknowledges the delivery.
use std::{sync::Arc, time::Duration};

use aggregator_engine::traits::{DeliveryError, WebhookRequest, WebhookTransport};
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Url,
};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const EVENT_HEADER: &str = "x-event";

#[derive(Clone)]
pub struct HttpWebhookTransport {
    client: Arc<Client>,
}

impl HttpWebhookTransport {
    /// `timeout` bounds each request. A timed-out delivery is a transient failure.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("User-Agent", HeaderValue::from_static("aggregator-webhooks/0.1"));
        let client = Client::builder().default_headers(headers).timeout(timeout).build()?;
        Ok(Self { client: Arc::new(client) })
    }
}

impl WebhookTransport for HttpWebhookTransport {
    async fn deliver(&self, request: &WebhookRequest) -> Result<(), DeliveryError> {
        let url = Url::parse(&request.url)
            .map_err(|e| DeliveryError::Permanent(format!("Invalid webhook URL {}: {e}", request.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::Permanent(format!("Unsupported webhook URL scheme: {}", url.scheme())));
        }
        trace!("📨️ POST {} to {url}", request.event);
        let response = self
            .client
            .post(url)
            .header(SIGNATURE_HEADER, request.signature.as_str())
            .header(EVENT_HEADER, request.event.as_str())
            .body(request.payload.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Transient(format!("Request timed out: {e}"))
                } else {
                    DeliveryError::Transient(format!("Request failed: {e}"))
                }
            })?;
        let status = response.status();
        if status.is_success() {
            trace!("📨️ {} acknowledged with {status}", request.url);
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_else(|_| "No response body".to_string());
            Err(DeliveryError::Transient(format!("Destination responded with {status}: {text}")))
        }
    }
}
