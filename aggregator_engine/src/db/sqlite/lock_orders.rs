use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use super::is_unique_violation;
use crate::{
    db_types::{
        LockOrderCancellation,
        LockOrderFulfillment,
        LockOrderStatus,
        LockPaymentOrder,
        NewLockPaymentOrder,
        PaymentOrderStatus,
        ValidationStatus,
    },
    traits::{Cancellation, InsertResult, StorageError},
};

/// Inserts a new lock order in `Pending` status, unless one with the same `tx_hash` already exists.
pub async fn idempotent_insert(
    order: NewLockPaymentOrder,
    conn: &mut SqliteConnection,
) -> Result<InsertResult<LockPaymentOrder>, StorageError> {
    let now = Utc::now();
    let result = sqlx::query_as::<_, LockPaymentOrder>(
        r#"
        INSERT INTO lock_payment_orders (
            order_id,
            payment_order_id,
            token_id,
            amount,
            rate,
            order_percent,
            currency,
            institution,
            account_identifier,
            account_name,
            status,
            block_number,
            tx_hash,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
        RETURNING *
        "#,
    )
    .bind(&order.order_id)
    .bind(order.payment_order_id)
    .bind(order.token_id)
    .bind(order.amount)
    .bind(order.rate)
    .bind(order.order_percent)
    .bind(&order.currency)
    .bind(&order.institution)
    .bind(&order.account_identifier)
    .bind(&order.account_name)
    .bind(LockOrderStatus::Pending)
    .bind(order.block_number)
    .bind(&order.tx_hash)
    .bind(now)
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(o) => Ok(InsertResult::Inserted(o)),
        Err(e) if is_unique_violation(&e) => {
            trace!("🗃️ A lock order for tx {} already exists", order.tx_hash);
            fetch_by_tx_hash(&order.tx_hash, conn)
                .await?
                .map(InsertResult::AlreadyExists)
                .ok_or_else(|| StorageError::InsertError(e.to_string()))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_lock_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as("SELECT * FROM lock_payment_orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_by_tx_hash(
    tx_hash: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as("SELECT * FROM lock_payment_orders WHERE tx_hash = $1")
        .bind(tx_hash)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_matchable_orders(
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LockPaymentOrder>, StorageError> {
    let orders = sqlx::query_as(
        r#"SELECT * FROM lock_payment_orders
        WHERE status = $1 AND needs_manual_review = FALSE
        ORDER BY created_at ASC, id ASC
        LIMIT $2"#,
    )
    .bind(LockOrderStatus::Pending)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub async fn fetch_stale_processing_orders(
    older_than: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<LockPaymentOrder>, StorageError> {
    let orders = sqlx::query_as(
        "SELECT * FROM lock_payment_orders WHERE status = $1 AND updated_at < $2 ORDER BY updated_at ASC, id ASC",
    )
    .bind(LockOrderStatus::Processing)
    .bind(older_than)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub async fn fetch_orders_for_manual_review(
    conn: &mut SqliteConnection,
) -> Result<Vec<LockPaymentOrder>, StorageError> {
    let orders = sqlx::query_as(
        "SELECT * FROM lock_payment_orders WHERE status = $1 AND needs_manual_review = TRUE ORDER BY id ASC",
    )
    .bind(LockOrderStatus::Pending)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

/// `Pending -> Processing`. Returns `None` if another matcher got there first.
pub(crate) async fn assign(
    id: i64,
    provider_id: i64,
    bucket_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as::<_, LockPaymentOrder>(
        r#"
        UPDATE lock_payment_orders SET
            status = $1,
            provider_id = $2,
            provision_bucket_id = $3,
            updated_at = $4
        WHERE id = $5 AND status = $6
        RETURNING *
        "#,
    )
    .bind(LockOrderStatus::Processing)
    .bind(provider_id)
    .bind(bucket_id)
    .bind(Utc::now())
    .bind(id)
    .bind(LockOrderStatus::Pending)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn record_match_failure(
    id: i64,
    max_sweeps: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as::<_, LockPaymentOrder>(
        r#"
        UPDATE lock_payment_orders SET
            match_attempts = match_attempts + 1,
            needs_manual_review = (match_attempts + 1 >= $1),
            updated_at = $2
        WHERE id = $3 AND status = $4 AND needs_manual_review = FALSE
        RETURNING *
        "#,
    )
    .bind(max_sweeps)
    .bind(Utc::now())
    .bind(id)
    .bind(LockOrderStatus::Pending)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub(crate) async fn update_status(
    id: i64,
    expected: LockOrderStatus,
    new_status: LockOrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as::<_, LockPaymentOrder>(
        "UPDATE lock_payment_orders SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4 RETURNING *",
    )
    .bind(new_status)
    .bind(Utc::now())
    .bind(id)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    match &order {
        Some(_) => debug!("🗃️ Lock order #{id}: {expected} -> {new_status}"),
        None => trace!("🗃️ Lock order #{id} was not {expected}. Status unchanged."),
    }
    Ok(order)
}

pub(crate) async fn insert_fulfillment(
    lock_order_id: i64,
    tx_id: &str,
    psp: &str,
    conn: &mut SqliteConnection,
) -> Result<LockOrderFulfillment, StorageError> {
    let now = Utc::now();
    let fulfillment = sqlx::query_as::<_, LockOrderFulfillment>(
        r#"
        INSERT INTO lock_order_fulfillments (lock_order_id, tx_id, psp, validation_status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING *
        "#,
    )
    .bind(lock_order_id)
    .bind(tx_id)
    .bind(psp)
    .bind(ValidationStatus::Pending)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(|e| StorageError::InsertError(e.to_string()))?;
    Ok(fulfillment)
}

pub async fn fetch_pending_fulfillment(
    lock_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<LockOrderFulfillment>, StorageError> {
    let fulfillment =
        sqlx::query_as("SELECT * FROM lock_order_fulfillments WHERE lock_order_id = $1 AND validation_status = $2")
            .bind(lock_order_id)
            .bind(ValidationStatus::Pending)
            .fetch_optional(conn)
            .await?;
    Ok(fulfillment)
}

pub async fn fetch_fulfillments(
    lock_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LockOrderFulfillment>, StorageError> {
    let fulfillments = sqlx::query_as("SELECT * FROM lock_order_fulfillments WHERE lock_order_id = $1 ORDER BY id ASC")
        .bind(lock_order_id)
        .fetch_all(conn)
        .await?;
    Ok(fulfillments)
}

/// Moves a `Pending` fulfillment to a terminal validation status. Returns false if the fulfillment does not belong to
/// the order or was already validated.
pub(crate) async fn close_fulfillment(
    fulfillment_id: i64,
    lock_order_id: i64,
    status: ValidationStatus,
    error: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE lock_order_fulfillments SET validation_status = $1, validation_error = $2, updated_at = $3
        WHERE id = $4 AND lock_order_id = $5 AND validation_status = $6
        "#,
    )
    .bind(status)
    .bind(error)
    .bind(Utc::now())
    .bind(fulfillment_id)
    .bind(lock_order_id)
    .bind(ValidationStatus::Pending)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Settles the parent payment order once it is fully funded and every one of its lock orders has been validated.
pub(crate) async fn settle_payment_order_if_complete(
    payment_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE payment_orders SET status = $1, updated_at = $2
        WHERE id = $3 AND status = $4 AND amount_paid >= amount
          AND NOT EXISTS (
            SELECT 1 FROM lock_payment_orders WHERE payment_order_id = $3 AND status != $5
          )
        "#,
    )
    .bind(PaymentOrderStatus::Settled)
    .bind(Utc::now())
    .bind(payment_order_id)
    .bind(PaymentOrderStatus::Pending)
    .bind(LockOrderStatus::Validated)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Refunds the parent payment order once every one of its lock orders has been refunded. A sibling that was paid out,
/// or is still in flight, keeps the payment order `Pending`.
pub(crate) async fn refund_payment_order_if_complete(
    payment_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE payment_orders SET status = $1, updated_at = $2
        WHERE id = $3 AND status = $4
          AND NOT EXISTS (
            SELECT 1 FROM lock_payment_orders WHERE payment_order_id = $3 AND status != $5
          )
        "#,
    )
    .bind(PaymentOrderStatus::Refunded)
    .bind(Utc::now())
    .bind(payment_order_id)
    .bind(PaymentOrderStatus::Pending)
    .bind(LockOrderStatus::Refunded)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Applies the cancellation guard, counter, reason list and reassignment reset in one statement, so that
/// `cancellation_count` and the length of `cancellation_reasons` can never drift apart.
pub(crate) async fn apply_cancellation(
    cancellation: &Cancellation,
    conn: &mut SqliteConnection,
) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as::<_, LockPaymentOrder>(
        r#"
        UPDATE lock_payment_orders SET
            status = $1,
            cancellation_count = cancellation_count + 1,
            cancellation_reasons = json_insert(cancellation_reasons, '$[#]', $2),
            provider_id = CASE WHEN $1 = $3 THEN NULL ELSE provider_id END,
            provision_bucket_id = CASE WHEN $1 = $3 THEN NULL ELSE provision_bucket_id END,
            match_attempts = CASE WHEN $1 = $3 THEN 0 ELSE match_attempts END,
            updated_at = $4
        WHERE id = $5 AND status = $6 AND cancellation_count = $7
        RETURNING *
        "#,
    )
    .bind(cancellation.next_status)
    .bind(&cancellation.reason)
    .bind(LockOrderStatus::Pending)
    .bind(Utc::now())
    .bind(cancellation.lock_order_id)
    .bind(cancellation.expected_status)
    .bind(cancellation.expected_cancellation_count)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub(crate) async fn insert_cancellation(
    lock_order_id: i64,
    provider_id: Option<i64>,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<LockOrderCancellation, StorageError> {
    let record = sqlx::query_as::<_, LockOrderCancellation>(
        r#"
        INSERT INTO lock_order_cancellations (lock_order_id, provider_id, reason, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(lock_order_id)
    .bind(provider_id)
    .bind(reason)
    .bind(Utc::now())
    .fetch_one(conn)
    .await
    .map_err(|e| StorageError::InsertError(e.to_string()))?;
    Ok(record)
}

pub async fn fetch_cancellations(
    lock_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LockOrderCancellation>, StorageError> {
    let records = sqlx::query_as("SELECT * FROM lock_order_cancellations WHERE lock_order_id = $1 ORDER BY id ASC")
        .bind(lock_order_id)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

pub(crate) async fn mark_refunded(
    id: i64,
    refund_tx_hash: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as::<_, LockPaymentOrder>(
        r#"
        UPDATE lock_payment_orders SET
            status = $1,
            is_refunded = TRUE,
            refund_tx_hash = $2,
            is_refund_confirmed = FALSE,
            updated_at = $3
        WHERE id = $4 AND status = $5
        RETURNING *
        "#,
    )
    .bind(LockOrderStatus::Refunded)
    .bind(refund_tx_hash)
    .bind(Utc::now())
    .bind(id)
    .bind(LockOrderStatus::Cancelled)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn confirm_refund(id: i64, conn: &mut SqliteConnection) -> Result<Option<LockPaymentOrder>, StorageError> {
    let order = sqlx::query_as::<_, LockPaymentOrder>(
        r#"
        UPDATE lock_payment_orders SET is_refund_confirmed = TRUE, updated_at = $1
        WHERE id = $2 AND status = $3 AND is_refund_confirmed = FALSE
        RETURNING *
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .bind(LockOrderStatus::Refunded)
    .fetch_optional(conn)
    .await?;
    if order.is_some() {
        debug!("🗃️ Refund for lock order #{id} confirmed on-chain");
    }
    Ok(order)
}
