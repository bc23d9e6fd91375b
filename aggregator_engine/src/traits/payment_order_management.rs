use chrono::{DateTime, Utc};

use crate::{
    db_types::{NewPaymentOrder, PaymentOrder, PaymentOrderStatus},
    traits::StorageError,
};

#[allow(async_fn_in_trait)]
pub trait PaymentOrderManagement {
    /// Stores a new order in `Initiated` status.
    async fn insert_payment_order(&self, order: NewPaymentOrder) -> Result<PaymentOrder, StorageError>;

    async fn fetch_payment_order(&self, id: i64) -> Result<Option<PaymentOrder>, StorageError>;

    /// `Initiated` orders whose receive address lease ended before `now`.
    async fn fetch_unfunded_expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>, StorageError>;

    /// Moves the order from `expected` to `new_status`. Returns `None` if the order was not in `expected` status.
    async fn update_payment_order_status(
        &self,
        id: i64,
        expected: PaymentOrderStatus,
        new_status: PaymentOrderStatus,
    ) -> Result<Option<PaymentOrder>, StorageError>;
}
