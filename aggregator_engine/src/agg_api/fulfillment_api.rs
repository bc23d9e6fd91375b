use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    agg_api::errors::FulfillmentError,
    db_types::{LockOrderCancellation, LockOrderFulfillment, LockOrderStatus, LockPaymentOrder},
    events::{EventProducers, OrderCancelledEvent, OrderRefundedEvent, OrderValidatedEvent},
    traits::{Cancellation, LockOrderManagement, PaymentOrderManagement},
};

#[derive(Debug, Clone)]
pub struct FulfillmentOptions {
    /// Failed cycles an order may go through before it is cancelled for refund instead of being re-matched
    pub max_cancellations: i64,
    /// How long an order may sit in `Processing` before the sweeper takes it back from its provider
    pub order_timeout: Duration,
    /// How often the sweeper retries an order that changed underneath it
    pub max_conflict_retries: u32,
}

impl Default for FulfillmentOptions {
    fn default() -> Self {
        Self { max_cancellations: 3, order_timeout: Duration::minutes(10), max_conflict_retries: 3 }
    }
}

/// The verdict on a reported fulfillment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Success,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub reclaimed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

/// `FulfillmentApi` drives lock orders through their lifecycle once a provider has been assigned.
///
/// ```text
///   Pending ──► Processing ──► Fulfilled ──► Validated
///      ▲            │              │
///      └────────────┴──────────────┘   (declined, timed out or failed validation)
///                   │              │
///                   ▼              ▼
///               Cancelled ──► Refunded  (cancellation threshold reached)
/// ```
///
/// Every transition is a compare-and-swap on the order status. A caller that loses the race gets
/// [`FulfillmentError::StatusConflict`] and nothing is changed.
pub struct FulfillmentApi<B> {
    db: B,
    options: FulfillmentOptions,
    producers: EventProducers,
}

impl<B> Debug for FulfillmentApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FulfillmentApi ({:?})", self.options)
    }
}

impl<B> FulfillmentApi<B> {
    pub fn new(db: B, options: FulfillmentOptions, producers: EventProducers) -> Self {
        Self { db, options, producers }
    }

    pub fn options(&self) -> &FulfillmentOptions {
        &self.options
    }

    /// The status a failure moves an order to, given how many times it has failed before.
    pub fn status_after_failure(&self, cancellation_count: i64) -> LockOrderStatus {
        if cancellation_count >= self.options.max_cancellations {
            LockOrderStatus::Cancelled
        } else {
            LockOrderStatus::Pending
        }
    }
}

impl<B> FulfillmentApi<B>
where B: LockOrderManagement + PaymentOrderManagement
{
    async fn fetch_order(&self, id: i64) -> Result<LockPaymentOrder, FulfillmentError> {
        self.db.fetch_lock_order(id).await?.ok_or(FulfillmentError::LockOrderNotFound(id))
    }

    fn check_status(
        order: &LockPaymentOrder,
        expected: LockOrderStatus,
        action: &'static str,
    ) -> Result<(), FulfillmentError> {
        if order.status == expected {
            Ok(())
        } else {
            Err(FulfillmentError::InvalidTransition { id: order.id, status: order.status, action })
        }
    }

    fn check_assignee(order: &LockPaymentOrder, provider_id: i64) -> Result<(), FulfillmentError> {
        if order.provider_id == Some(provider_id) {
            Ok(())
        } else {
            Err(FulfillmentError::NotAssignee { id: order.id, provider_id })
        }
    }

    pub async fn lock_order(&self, id: i64) -> Result<LockPaymentOrder, FulfillmentError> {
        self.fetch_order(id).await
    }

    /// Every cancellation and failed validation the order has been through, oldest first.
    pub async fn cancellation_history(&self, id: i64) -> Result<Vec<LockOrderCancellation>, FulfillmentError> {
        Ok(self.db.fetch_cancellations(id).await?)
    }

    /// The assigned provider reports that it has paid out the order.
    pub async fn mark_fulfilled(
        &self,
        id: i64,
        provider_id: i64,
        tx_id: &str,
        psp: &str,
    ) -> Result<(LockPaymentOrder, LockOrderFulfillment), FulfillmentError> {
        let order = self.fetch_order(id).await?;
        Self::check_status(&order, LockOrderStatus::Processing, "fulfill")?;
        Self::check_assignee(&order, provider_id)?;
        let (order, fulfillment) =
            self.db.fulfill_lock_order(id, tx_id, psp).await?.ok_or(FulfillmentError::StatusConflict(id))?;
        info!("🧾️ Lock order #{id} fulfilled by provider #{provider_id} via {psp} (tx {tx_id})");
        Ok((order, fulfillment))
    }

    /// Records the verdict on the order's pending fulfillment.
    ///
    /// Success is terminal. A failed validation counts as a cancellation: the order goes back to `Pending` for
    /// re-matching, or to `Cancelled` once the cancellation threshold is reached.
    pub async fn validate(&self, id: i64, outcome: ValidationOutcome) -> Result<LockPaymentOrder, FulfillmentError> {
        let order = self.fetch_order(id).await?;
        Self::check_status(&order, LockOrderStatus::Fulfilled, "validate")?;
        let fulfillment =
            self.db.fetch_pending_fulfillment(id).await?.ok_or(FulfillmentError::NoPendingFulfillment(id))?;
        match outcome {
            ValidationOutcome::Success => {
                let order =
                    self.db.validate_lock_order(id, fulfillment.id).await?.ok_or(FulfillmentError::StatusConflict(id))?;
                info!("🧾️ Lock order #{id} validated (fulfillment #{})", fulfillment.id);
                let payment_order = self.db.fetch_payment_order(order.payment_order_id).await?;
                match payment_order {
                    Some(payment_order) => {
                        let event = OrderValidatedEvent { order: order.clone(), payment_order };
                        self.producers.publish_order_validated(event).await;
                    },
                    None => warn!("🧾️ Payment order #{} for lock order #{id} has vanished", order.payment_order_id),
                }
                Ok(order)
            },
            ValidationOutcome::Failed(reason) => {
                let reason = format!("Validation failed: {reason}");
                self.fail(&order, reason, Some(fulfillment.id)).await?.ok_or(FulfillmentError::StatusConflict(id))
            },
        }
    }

    /// The assigned provider declines the order.
    pub async fn cancel(&self, id: i64, provider_id: i64, reason: &str) -> Result<LockPaymentOrder, FulfillmentError> {
        let order = self.fetch_order(id).await?;
        Self::check_status(&order, LockOrderStatus::Processing, "cancel")?;
        Self::check_assignee(&order, provider_id)?;
        self.fail(&order, reason.to_string(), None).await?.ok_or(FulfillmentError::StatusConflict(id))
    }

    /// Counts a failed cycle against `order`, which must still be in the status it was read in. Returns `None` if the
    /// order changed in the meantime.
    async fn fail(
        &self,
        order: &LockPaymentOrder,
        reason: String,
        failed_fulfillment_id: Option<i64>,
    ) -> Result<Option<LockPaymentOrder>, FulfillmentError> {
        let cancellation = Cancellation {
            lock_order_id: order.id,
            expected_status: order.status,
            expected_cancellation_count: order.cancellation_count,
            next_status: self.status_after_failure(order.cancellation_count),
            provider_id: order.provider_id,
            reason: reason.clone(),
            failed_fulfillment_id,
        };
        let Some(updated) = self.db.cancel_lock_order(cancellation).await? else {
            return Ok(None);
        };
        let refund_required = updated.status == LockOrderStatus::Cancelled;
        if refund_required {
            warn!(
                "🧾️ Lock order #{} cancelled after {} failed cycles and must be refunded. Last reason: {reason}",
                updated.id, updated.cancellation_count
            );
        } else {
            info!(
                "🧾️ Lock order #{} returned to the matching pool ({} of {} cancellations): {reason}",
                updated.id, updated.cancellation_count, self.options.max_cancellations
            );
        }
        let event = OrderCancelledEvent { order: updated.clone(), reason, refund_required };
        self.producers.publish_order_cancelled(event).await;
        Ok(Some(updated))
    }

    /// Records the on-chain refund of a cancelled order. The refund is unconfirmed until [`Self::confirm_refund`].
    pub async fn refund(&self, id: i64, refund_tx_hash: &str) -> Result<LockPaymentOrder, FulfillmentError> {
        let order = self.fetch_order(id).await?;
        Self::check_status(&order, LockOrderStatus::Cancelled, "refund")?;
        let order = self.db.refund_lock_order(id, refund_tx_hash).await?.ok_or(FulfillmentError::StatusConflict(id))?;
        info!("🧾️ Lock order #{id} refunded in {refund_tx_hash}");
        match self.db.fetch_payment_order(order.payment_order_id).await? {
            Some(payment_order) => {
                let event = OrderRefundedEvent { order: order.clone(), payment_order };
                self.producers.publish_order_refunded(event).await;
            },
            None => warn!("🧾️ Payment order #{} for lock order #{id} has vanished", order.payment_order_id),
        }
        Ok(order)
    }

    /// Marks the refund transaction as confirmed on-chain. Confirming twice is harmless.
    pub async fn confirm_refund(&self, id: i64) -> Result<LockPaymentOrder, FulfillmentError> {
        let order = self.fetch_order(id).await?;
        Self::check_status(&order, LockOrderStatus::Refunded, "confirm the refund of")?;
        if order.is_refund_confirmed {
            debug!("🧾️ Refund of lock order #{id} was already confirmed");
            return Ok(order);
        }
        match self.db.confirm_refund(id).await? {
            Some(order) => {
                info!("🧾️ Refund of lock order #{id} confirmed");
                Ok(order)
            },
            // a concurrent confirmation got there first
            None => self.fetch_order(id).await,
        }
    }

    /// Takes back orders that have been `Processing` for longer than the order timeout, counting each as a
    /// cancellation by its provider.
    pub async fn reclaim_stale_orders(&self, now: DateTime<Utc>) -> Result<ReclaimReport, FulfillmentError> {
        let cutoff = now - self.options.order_timeout;
        let stale = self.db.fetch_stale_processing_orders(cutoff).await?;
        let mut report = ReclaimReport::default();
        for order in stale {
            let id = order.id;
            match self.reclaim(order, cutoff).await {
                Ok(Some(updated)) if updated.status == LockOrderStatus::Cancelled => report.cancelled += 1,
                Ok(Some(_)) => report.reclaimed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!("🧾️ Could not reclaim stale lock order #{id}: {e}");
                    report.skipped += 1;
                },
            }
        }
        if report != ReclaimReport::default() {
            debug!("🧾️ Stale order sweep complete: {report:?}");
        }
        Ok(report)
    }

    async fn reclaim(
        &self,
        mut order: LockPaymentOrder,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<LockPaymentOrder>, FulfillmentError> {
        let minutes = self.options.order_timeout.num_minutes();
        for attempt in 0..=self.options.max_conflict_retries {
            if order.status != LockOrderStatus::Processing || order.updated_at > cutoff {
                return Ok(None);
            }
            let reason = format!("Provider did not fulfill the order within {minutes} minutes");
            if let Some(updated) = self.fail(&order, reason, None).await? {
                return Ok(Some(updated));
            }
            trace!("🧾️ Lock order #{} changed while reclaiming it (attempt {attempt}). Re-reading.", order.id);
            match self.db.fetch_lock_order(order.id).await? {
                Some(o) => order = o,
                None => return Ok(None),
            }
        }
        warn!("🧾️ Gave up reclaiming lock order #{} after repeated conflicts", order.id);
        Ok(None)
    }
}
