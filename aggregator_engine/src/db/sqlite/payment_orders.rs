use agg_common::Amount;
use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewPaymentOrder, PaymentOrder, PaymentOrderStatus, ReceiveAddressStatus},
    traits::StorageError,
};

/// Inserts a new payment order in `Initiated` status. This is not atomic. You can embed this call inside a transaction
/// if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
pub async fn insert_payment_order(
    order: NewPaymentOrder,
    conn: &mut SqliteConnection,
) -> Result<PaymentOrder, StorageError> {
    let now = Utc::now();
    let order = sqlx::query_as::<_, PaymentOrder>(
        r#"
        INSERT INTO payment_orders (
            token_id,
            amount,
            rate,
            status,
            institution,
            account_identifier,
            account_name,
            currency,
            memo,
            webhook_url,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
        RETURNING *
        "#,
    )
    .bind(order.token_id)
    .bind(order.amount)
    .bind(order.rate)
    .bind(PaymentOrderStatus::Initiated)
    .bind(order.institution)
    .bind(order.account_identifier)
    .bind(order.account_name)
    .bind(order.currency)
    .bind(order.memo)
    .bind(order.webhook_url)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(|e| StorageError::InsertError(e.to_string()))?;
    debug!("🗃️ Payment order #{} for {} has been saved", order.id, order.amount);
    Ok(order)
}

pub async fn fetch_payment_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<PaymentOrder>, StorageError> {
    let order = sqlx::query_as("SELECT * FROM payment_orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_unfunded_expired_orders(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentOrder>, StorageError> {
    let orders = sqlx::query_as(
        r#"
        SELECT payment_orders.* FROM payment_orders
        JOIN receive_addresses ON receive_addresses.payment_order_id = payment_orders.id
        WHERE payment_orders.status = $1
          AND receive_addresses.status != $2
          AND receive_addresses.valid_until < $3
        ORDER BY payment_orders.id ASC
        "#,
    )
    .bind(PaymentOrderStatus::Initiated)
    .bind(ReceiveAddressStatus::Expired)
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub async fn update_status(
    id: i64,
    expected: PaymentOrderStatus,
    new_status: PaymentOrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentOrder>, StorageError> {
    let order = sqlx::query_as::<_, PaymentOrder>(
        "UPDATE payment_orders SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4 RETURNING *",
    )
    .bind(new_status)
    .bind(Utc::now())
    .bind(id)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    match &order {
        Some(_) => debug!("🗃️ Payment order #{id}: {expected} -> {new_status}"),
        None => trace!("🗃️ Payment order #{id} was not {expected}. Status unchanged."),
    }
    Ok(order)
}

/// Credits a deposit to the order. The first deposit moves the order from `Initiated` to `Pending` and records the
/// funding transaction hash.
pub(crate) async fn credit_deposit(
    id: i64,
    amount: Amount,
    tx_hash: &str,
    conn: &mut SqliteConnection,
) -> Result<PaymentOrder, StorageError> {
    let order = sqlx::query_as::<_, PaymentOrder>(
        r#"
        UPDATE payment_orders SET
            amount_paid = amount_paid + $1,
            tx_hash = COALESCE(tx_hash, $2),
            status = CASE WHEN status = $3 THEN $4 ELSE status END,
            updated_at = $5
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(amount)
    .bind(tx_hash)
    .bind(PaymentOrderStatus::Initiated)
    .bind(PaymentOrderStatus::Pending)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| StorageError::not_found("payment order", id))?;
    Ok(order)
}

pub(crate) async fn set_receive_address(
    id: i64,
    address: &str,
    conn: &mut SqliteConnection,
) -> Result<(), StorageError> {
    let result = sqlx::query("UPDATE payment_orders SET receive_address_text = $1, updated_at = $2 WHERE id = $3")
        .bind(address)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::not_found("payment order", id));
    }
    Ok(())
}
