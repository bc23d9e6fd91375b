use chrono::{DateTime, Utc};

use crate::{
    db_types::{NewWebhookRetryAttempt, WebhookAttemptStatus, WebhookRetryAttempt},
    traits::{StorageError, WebhookFailure},
};

/// Scheduling for webhook redelivery.
///
/// Concurrent retry workers coordinate through [`Self::claim_webhook_attempt`]: a worker only delivers an attempt after
/// successfully pushing its `next_retry_time` forward to a lease deadline, so a due attempt is delivered by one worker.
#[allow(async_fn_in_trait)]
pub trait WebhookManagement {
    /// Stores the record of a failed first delivery, with `attempt_number = 1`.
    async fn insert_webhook_attempt(&self, attempt: NewWebhookRetryAttempt)
        -> Result<WebhookRetryAttempt, StorageError>;

    async fn fetch_webhook_attempt(&self, id: i64) -> Result<Option<WebhookRetryAttempt>, StorageError>;

    /// `Pending` attempts with `next_retry_time <= now`, earliest first.
    async fn fetch_due_webhook_attempts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookRetryAttempt>, StorageError>;

    async fn fetch_webhook_attempts_by_status(
        &self,
        status: WebhookAttemptStatus,
    ) -> Result<Vec<WebhookRetryAttempt>, StorageError>;

    /// Moves `next_retry_time` from `expected_next_retry` to `lease_until` if the attempt is still `Pending` and
    /// unchanged. Returns true if this caller now owns the delivery.
    async fn claim_webhook_attempt(
        &self,
        id: i64,
        expected_next_retry: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Marks a claimed attempt as delivered.
    async fn record_webhook_success(
        &self,
        id: i64,
        expected_attempt_number: i64,
    ) -> Result<Option<WebhookRetryAttempt>, StorageError>;

    /// Records a failed redelivery: increments `attempt_number` and applies the new status and schedule.
    async fn record_webhook_failure(
        &self,
        failure: WebhookFailure,
    ) -> Result<Option<WebhookRetryAttempt>, StorageError>;
}
