use chrono::{DateTime, Utc};

use crate::{
    db_types::{LockOrderCancellation, LockOrderFulfillment, LockPaymentOrder, NewLockPaymentOrder},
    traits::{Cancellation, InsertResult, StorageError},
};

/// Lock order persistence and guarded status transitions.
///
/// Every method that changes `status` is a compare-and-swap on the current status: it returns `None` (or `false`) when
/// the order was no longer in the expected state, and leaves no side effects behind in that case.
#[allow(async_fn_in_trait)]
pub trait LockOrderManagement {
    /// Records a confirmed deposit to the leased address `address_id`, in a single atomic transaction:
    /// * inserts `order` in `Pending` status. If a lock order with the same `tx_hash` exists, nothing else is done and
    ///   `AlreadyExists` is returned with the stored order.
    /// * adds `order.amount` to the payment order's `amount_paid`, stores the funding `tx_hash` if it had none, and moves
    ///   it from `Initiated` to `Pending`.
    /// * advances the address's `last_indexed_block` to `max(current, order.block_number)`, adds the amount to
    ///   `amount_received`, stamps `last_used`, and sets the address status to `Used` if the payment order is now fully
    ///   funded, or `PartiallyUsed` otherwise.
    ///
    /// Returns `None`, with nothing written, if the address is no longer leased to `order.payment_order_id`, e.g.
    /// because it expired and was recycled after the caller read it.
    async fn record_deposit(
        &self,
        address_id: i64,
        order: NewLockPaymentOrder,
    ) -> Result<Option<InsertResult<LockPaymentOrder>>, StorageError>;

    async fn fetch_lock_order(&self, id: i64) -> Result<Option<LockPaymentOrder>, StorageError>;

    async fn fetch_lock_order_by_tx_hash(&self, tx_hash: &str) -> Result<Option<LockPaymentOrder>, StorageError>;

    /// `Pending` orders not flagged for manual review, oldest first.
    async fn fetch_matchable_orders(&self, limit: i64) -> Result<Vec<LockPaymentOrder>, StorageError>;

    /// `Processing` orders that have not changed since `older_than`.
    async fn fetch_stale_processing_orders(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<LockPaymentOrder>, StorageError>;

    async fn fetch_orders_for_manual_review(&self) -> Result<Vec<LockPaymentOrder>, StorageError>;

    /// `Pending -> Processing`, recording the provider and bucket, and stamping the provider's `last_assigned_at`.
    async fn assign_lock_order(
        &self,
        id: i64,
        provider_id: i64,
        bucket_id: i64,
    ) -> Result<Option<LockPaymentOrder>, StorageError>;

    /// Counts a matching pass that found no provider. Once `match_attempts` reaches `max_sweeps`, the order is flagged
    /// for manual review. Returns the updated order.
    async fn record_match_failure(&self, id: i64, max_sweeps: i64) -> Result<Option<LockPaymentOrder>, StorageError>;

    /// `Processing -> Fulfilled`, creating a fulfillment record with `Pending` validation.
    async fn fulfill_lock_order(
        &self,
        id: i64,
        tx_id: &str,
        psp: &str,
    ) -> Result<Option<(LockPaymentOrder, LockOrderFulfillment)>, StorageError>;

    /// The fulfillment record still awaiting validation, if any.
    async fn fetch_pending_fulfillment(&self, lock_order_id: i64)
        -> Result<Option<LockOrderFulfillment>, StorageError>;

    /// All fulfillment records for the order, oldest first.
    async fn fetch_fulfillments(&self, lock_order_id: i64) -> Result<Vec<LockOrderFulfillment>, StorageError>;

    /// `Fulfilled -> Validated`. Marks the fulfillment `Success` and the parent payment order `Settled`.
    async fn validate_lock_order(
        &self,
        id: i64,
        fulfillment_id: i64,
    ) -> Result<Option<LockPaymentOrder>, StorageError>;

    /// Applies a guarded cancellation. See [`Cancellation`].
    async fn cancel_lock_order(&self, cancellation: Cancellation) -> Result<Option<LockPaymentOrder>, StorageError>;

    async fn fetch_cancellations(&self, lock_order_id: i64) -> Result<Vec<LockOrderCancellation>, StorageError>;

    /// `Cancelled -> Refunded`. Sets `is_refunded` and stores the refund transaction hash with `is_refund_confirmed =
    /// false`. The parent payment order is marked `Refunded` only once all of its lock orders are refunded.
    async fn refund_lock_order(&self, id: i64, refund_tx_hash: &str) -> Result<Option<LockPaymentOrder>, StorageError>;

    /// Sets `is_refund_confirmed` on a `Refunded` order whose refund is not yet confirmed.
    async fn confirm_refund(&self, id: i64) -> Result<Option<LockPaymentOrder>, StorageError>;
}

