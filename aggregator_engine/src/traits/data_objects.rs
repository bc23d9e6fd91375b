use chrono::{DateTime, Utc};

use crate::db_types::{LockOrderStatus, WebhookAttemptStatus};

/// The outcome of an idempotent insert. Both variants carry the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult<T> {
    Inserted(T),
    AlreadyExists(T),
}

impl<T> InsertResult<T> {
    pub fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Inserted(t) | Self::AlreadyExists(t) => t,
        }
    }
}

/// A guarded cancellation of a lock order.
///
/// The backend applies it only if the order still has `expected_status` and `expected_cancellation_count`, so a decision
/// made on a stale read of the order is never applied. In one atomic step it increments
/// `cancellation_count`, appends `reason` to `cancellation_reasons`, records the history entry, moves the order to
/// `next_status` (clearing the assignee when returning to `Pending`), and marks `failed_fulfillment_id` as `Failed`
/// if one is given.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub lock_order_id: i64,
    pub expected_status: LockOrderStatus,
    pub expected_cancellation_count: i64,
    pub next_status: LockOrderStatus,
    pub provider_id: Option<i64>,
    pub reason: String,
    pub failed_fulfillment_id: Option<i64>,
}

/// A failed webhook redelivery, applied only if the attempt still has `expected_attempt_number`.
#[derive(Debug, Clone)]
pub struct WebhookFailure {
    pub attempt_id: i64,
    pub expected_attempt_number: i64,
    pub next_status: WebhookAttemptStatus,
    pub next_retry_time: DateTime<Utc>,
    pub error: String,
}
