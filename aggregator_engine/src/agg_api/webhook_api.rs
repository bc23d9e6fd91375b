use std::fmt::Debug;

use agg_common::Secret;
use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::Serialize;

use crate::{
    agg_api::errors::WebhookError,
    db_types::{NewWebhookRetryAttempt, WebhookAttemptStatus, WebhookRetryAttempt},
    events::{EventProducers, WebhookExhaustedEvent},
    helpers::{sign_payload, BackoffPolicy},
    traits::{DeliveryError, WebhookFailure, WebhookManagement, WebhookRequest, WebhookTransport},
};

#[derive(Debug, Clone)]
pub struct WebhookOptions {
    pub backoff: BackoffPolicy,
    /// How long a retry worker owns an attempt it has claimed. Must comfortably exceed the transport timeout.
    pub claim_lease: Duration,
    /// Attempts redelivered per pass
    pub batch_size: i64,
}

impl Default for WebhookOptions {
    fn default() -> Self {
        Self { backoff: BackoffPolicy::default(), claim_lease: Duration::seconds(60), batch_size: 50 }
    }
}

/// The JSON body posted to webhook destinations.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEnvelope<'a, T: Serialize> {
    pub event: &'a str,
    pub data: &'a T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The first delivery succeeded. Nothing was stored.
    Delivered,
    /// The first delivery failed and a retry is scheduled
    Scheduled(WebhookRetryAttempt),
    /// The destination rejected the delivery permanently
    Failed(WebhookRetryAttempt),
    /// The first delivery failed and the policy allows no retries
    Exhausted(WebhookRetryAttempt),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub delivered: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    pub failed: usize,
    /// Attempts claimed by another worker first
    pub skipped: usize,
}

/// `WebhookApi` delivers signed event notifications to merchant endpoints.
///
/// The payload is serialized and signed exactly once, at enqueue time. Retries send the stored bytes and signature
/// verbatim. Redelivery follows the [`BackoffPolicy`] until the attempt succeeds, fails permanently or is exhausted.
pub struct WebhookApi<B, T> {
    db: B,
    transport: T,
    secret: Secret<String>,
    options: WebhookOptions,
    producers: EventProducers,
}

impl<B, T> Debug for WebhookApi<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi ({:?})", self.options)
    }
}

impl<B, T> WebhookApi<B, T> {
    pub fn new(db: B, transport: T, secret: Secret<String>, options: WebhookOptions, producers: EventProducers) -> Self {
        Self { db, transport, secret, options, producers }
    }

    /// Serializes `data` in the webhook envelope and signs the resulting bytes.
    pub fn build_request<D: Serialize>(&self, event: &str, data: &D, url: &str) -> Result<WebhookRequest, WebhookError> {
        let payload = serde_json::to_string(&WebhookEnvelope { event, data })?;
        let signature = sign_payload(self.secret.reveal(), payload.as_bytes())
            .map_err(|e| WebhookError::SignatureError(e.to_string()))?;
        Ok(WebhookRequest { url: url.to_string(), event: event.to_string(), payload, signature })
    }
}

impl<B, T> WebhookApi<B, T>
where
    B: WebhookManagement,
    T: WebhookTransport,
{
    /// Delivers `data` to `url` right away, and schedules redelivery if that fails.
    pub async fn enqueue<D: Serialize>(&self, event: &str, data: &D, url: &str) -> Result<EnqueueOutcome, WebhookError> {
        let request = self.build_request(event, data, url)?;
        let now = Utc::now();
        let (status, next_retry_time, error) = match self.transport.deliver(&request).await {
            Ok(()) => {
                debug!("📨️ Delivered {event} webhook to {url}");
                return Ok(EnqueueOutcome::Delivered);
            },
            Err(DeliveryError::Permanent(e)) => (WebhookAttemptStatus::Failed, now, e),
            Err(DeliveryError::Transient(e)) if self.options.backoff.is_exhausted(1) => {
                (WebhookAttemptStatus::Exhausted, now, e)
            },
            Err(DeliveryError::Transient(e)) => {
                (WebhookAttemptStatus::Pending, self.options.backoff.next_retry_time(now, 1), e)
            },
        };
        let attempt = NewWebhookRetryAttempt {
            event: request.event,
            url: request.url,
            payload: request.payload,
            signature: request.signature,
            next_retry_time,
            status,
            last_error: Some(error.clone()),
        };
        let attempt = self.db.insert_webhook_attempt(attempt).await?;
        let outcome = match status {
            WebhookAttemptStatus::Failed => {
                error!("📨️ {event} webhook to {url} failed permanently: {error}");
                EnqueueOutcome::Failed(attempt)
            },
            WebhookAttemptStatus::Exhausted => {
                self.escalate(&attempt).await;
                EnqueueOutcome::Exhausted(attempt)
            },
            _ => {
                info!(
                    "📨️ {event} webhook to {url} failed ({error}). Retry #{} scheduled for {}",
                    attempt.id, attempt.next_retry_time
                );
                EnqueueOutcome::Scheduled(attempt)
            },
        };
        Ok(outcome)
    }

    /// Redelivers every attempt that is due at `now`.
    pub async fn process_due_attempts(&self, now: DateTime<Utc>) -> Result<RetryReport, WebhookError> {
        let due = self.db.fetch_due_webhook_attempts(now, self.options.batch_size).await?;
        let mut report = RetryReport::default();
        for attempt in due {
            let id = attempt.id;
            match self.retry(attempt, now).await {
                Ok(Some(status)) => match status {
                    WebhookAttemptStatus::Success => report.delivered += 1,
                    WebhookAttemptStatus::Pending => report.rescheduled += 1,
                    WebhookAttemptStatus::Exhausted => report.exhausted += 1,
                    WebhookAttemptStatus::Failed => report.failed += 1,
                },
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!("📨️ Could not process webhook retry #{id}: {e}");
                    report.skipped += 1;
                },
            }
        }
        if report != RetryReport::default() {
            debug!("📨️ Webhook retry pass complete: {report:?}");
        }
        Ok(report)
    }

    async fn retry(
        &self,
        attempt: WebhookRetryAttempt,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookAttemptStatus>, WebhookError> {
        let lease_until = now + self.options.claim_lease;
        if !self.db.claim_webhook_attempt(attempt.id, attempt.next_retry_time, lease_until).await? {
            trace!("📨️ Webhook retry #{} was claimed by another worker", attempt.id);
            return Ok(None);
        }
        let request = WebhookRequest {
            url: attempt.url.clone(),
            event: attempt.event.clone(),
            payload: attempt.payload.clone(),
            signature: attempt.signature.clone(),
        };
        let failure = match self.transport.deliver(&request).await {
            Ok(()) => {
                let updated = self.db.record_webhook_success(attempt.id, attempt.attempt_number).await?;
                if updated.is_some() {
                    info!(
                        "📨️ {} webhook to {} delivered on retry #{} (attempt {})",
                        attempt.event,
                        attempt.url,
                        attempt.id,
                        attempt.attempt_number + 1
                    );
                }
                return Ok(updated.map(|a| a.status));
            },
            Err(e) => e,
        };
        let failures = attempt.attempt_number + 1;
        let (next_status, next_retry_time, error) = match failure {
            DeliveryError::Permanent(e) => (WebhookAttemptStatus::Failed, now, e),
            DeliveryError::Transient(e) if self.options.backoff.is_exhausted(failures) => {
                (WebhookAttemptStatus::Exhausted, now, e)
            },
            DeliveryError::Transient(e) => {
                (WebhookAttemptStatus::Pending, self.options.backoff.next_retry_time(now, failures), e)
            },
        };
        let failure = WebhookFailure {
            attempt_id: attempt.id,
            expected_attempt_number: attempt.attempt_number,
            next_status,
            next_retry_time,
            error: error.clone(),
        };
        let Some(updated) = self.db.record_webhook_failure(failure).await? else {
            return Ok(None);
        };
        match updated.status {
            WebhookAttemptStatus::Exhausted => self.escalate(&updated).await,
            WebhookAttemptStatus::Failed => {
                error!("📨️ {} webhook to {} failed permanently: {error}", updated.event, updated.url)
            },
            _ => debug!(
                "📨️ Webhook retry #{} failed ({error}). Attempt {} scheduled for {}",
                updated.id,
                updated.attempt_number + 1,
                updated.next_retry_time
            ),
        }
        Ok(Some(updated.status))
    }

    async fn escalate(&self, attempt: &WebhookRetryAttempt) {
        error!(
            "📨️ Giving up on {} webhook to {} after {} failed deliveries. Last error: {}",
            attempt.event,
            attempt.url,
            attempt.attempt_number,
            attempt.last_error.as_deref().unwrap_or("unknown")
        );
        let event = WebhookExhaustedEvent { attempt: attempt.clone() };
        self.producers.publish_webhook_exhausted(event).await;
    }

    pub async fn exhausted_attempts(&self) -> Result<Vec<WebhookRetryAttempt>, WebhookError> {
        Ok(self.db.fetch_webhook_attempts_by_status(WebhookAttemptStatus::Exhausted).await?)
    }
}
