use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{
    LockPaymentOrder,
    PaymentOrder,
    ProviderProfile,
    ProvisionBucket,
    WebhookRetryAttempt,
};

/// A confirmed deposit has been recorded as a new lock order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOrderCreatedEvent {
    pub order: LockPaymentOrder,
    pub payment_order: PaymentOrder,
}

/// A lock order has been assigned to a provider. The provider should be told about it out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAssignedEvent {
    pub order: LockPaymentOrder,
    pub provider: ProviderProfile,
    pub bucket: ProvisionBucket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderValidatedEvent {
    pub order: LockPaymentOrder,
    pub payment_order: PaymentOrder,
}

/// A lock order was cancelled by its provider, failed validation or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order: LockPaymentOrder,
    pub reason: String,
    /// The cancellation threshold was reached and the funds must be returned on-chain
    pub refund_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRefundedEvent {
    pub order: LockPaymentOrder,
    pub payment_order: PaymentOrder,
}

/// A payment order's funding window closed before any funds arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrderExpiredEvent {
    pub payment_order: PaymentOrder,
    pub expired_at: DateTime<Utc>,
}

/// A webhook could not be delivered after the maximum number of attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookExhaustedEvent {
    pub attempt: WebhookRetryAttempt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    LockOrderCreated(LockOrderCreatedEvent),
    ProviderAssigned(ProviderAssignedEvent),
    OrderValidated(OrderValidatedEvent),
    OrderCancelled(OrderCancelledEvent),
    OrderRefunded(OrderRefundedEvent),
    PaymentOrderExpired(PaymentOrderExpiredEvent),
    WebhookExhausted(WebhookExhaustedEvent),
}
