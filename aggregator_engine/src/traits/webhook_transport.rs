use thiserror::Error;

/// A signed webhook delivery. `payload` is sent byte-for-byte as signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,
    pub event: String,
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Transport error, timeout or a non-2xx response. Worth retrying.
    #[error("Webhook delivery failed: {0}")]
    Transient(String),
    /// The request can never succeed, e.g. the destination URL is malformed.
    #[error("Webhook delivery cannot succeed: {0}")]
    Permanent(String),
}

/// Outbound HTTP delivery of webhooks. Implementations must apply a per-call timeout and report a timeout as
/// [`DeliveryError::Transient`].
#[allow(async_fn_in_trait)]
pub trait WebhookTransport {
    async fn deliver(&self, request: &WebhookRequest) -> Result<(), DeliveryError>;
}
