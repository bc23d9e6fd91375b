use agg_common::Amount;
use chrono::Utc;
use log::{debug, trace};
use sqlx::SqliteConnection;

use super::is_unique_violation;
use crate::{
    db_types::{AddressLease, ReceiveAddress, ReceiveAddressStatus},
    traits::{InsertResult, StorageError},
};

/// Takes the lowest-indexed address from the recycling pool and leases it in a single statement, so two allocators can
/// never take the same pooled address.
pub async fn lease_recycled_address(
    lease: &AddressLease,
    conn: &mut SqliteConnection,
) -> Result<Option<ReceiveAddress>, StorageError> {
    let address = sqlx::query_as::<_, ReceiveAddress>(
        r#"
        UPDATE receive_addresses SET
            status = $1,
            payment_order_id = $2,
            last_indexed_block = $3,
            valid_until = $4,
            updated_at = $5
        WHERE id = (
            SELECT id FROM receive_addresses
            WHERE status = $6 AND payment_order_id IS NULL AND amount_received = 0 AND last_used IS NULL
            ORDER BY account_index ASC
            LIMIT 1
        ) AND payment_order_id IS NULL
        RETURNING *
        "#,
    )
    .bind(ReceiveAddressStatus::Unused)
    .bind(lease.payment_order_id)
    .bind(lease.chain_head)
    .bind(lease.valid_until)
    .bind(Utc::now())
    .bind(ReceiveAddressStatus::Expired)
    .fetch_optional(conn)
    .await?;
    if let Some(a) = &address {
        debug!("🗃️ Recycled address {} (index {}) leased to order #{}", a.address, a.account_index, lease.payment_order_id);
    }
    Ok(address)
}

pub async fn next_account_index(conn: &mut SqliteConnection) -> Result<i64, StorageError> {
    let (index,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(account_index) + 1, 0) FROM receive_addresses")
        .fetch_one(conn)
        .await?;
    Ok(index)
}

/// Inserts a freshly minted address. A unique violation means the index (or the order's lease) was claimed by someone
/// else first; the winner's record is returned as `AlreadyExists`.
pub async fn idempotent_insert(
    address: &str,
    account_index: i64,
    lease: &AddressLease,
    conn: &mut SqliteConnection,
) -> Result<InsertResult<ReceiveAddress>, StorageError> {
    let now = Utc::now();
    let result = sqlx::query_as::<_, ReceiveAddress>(
        r#"
        INSERT INTO receive_addresses (
            address,
            account_index,
            status,
            payment_order_id,
            last_indexed_block,
            valid_until,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        RETURNING *
        "#,
    )
    .bind(address)
    .bind(account_index)
    .bind(ReceiveAddressStatus::Unused)
    .bind(lease.payment_order_id)
    .bind(lease.chain_head)
    .bind(lease.valid_until)
    .bind(now)
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(a) => {
            debug!("🗃️ Minted address {} at index {account_index} for order #{}", a.address, lease.payment_order_id);
            Ok(InsertResult::Inserted(a))
        },
        Err(e) if is_unique_violation(&e) => {
            trace!("🗃️ Account index {account_index} or order #{} is already taken", lease.payment_order_id);
            let existing = match fetch_address_for_order(lease.payment_order_id, conn).await? {
                Some(a) => Some(a),
                None => fetch_by_account_index(account_index, conn).await?,
            };
            existing
                .or(fetch_receive_address(address, conn).await?)
                .map(InsertResult::AlreadyExists)
                .ok_or_else(|| StorageError::InsertError(e.to_string()))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_receive_address(
    address: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<ReceiveAddress>, StorageError> {
    let address =
        sqlx::query_as("SELECT * FROM receive_addresses WHERE address = $1").bind(address).fetch_optional(conn).await?;
    Ok(address)
}

pub async fn fetch_by_account_index(
    account_index: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<ReceiveAddress>, StorageError> {
    let address = sqlx::query_as("SELECT * FROM receive_addresses WHERE account_index = $1")
        .bind(account_index)
        .fetch_optional(conn)
        .await?;
    Ok(address)
}

pub async fn fetch_address_for_order(
    payment_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<ReceiveAddress>, StorageError> {
    let address = sqlx::query_as("SELECT * FROM receive_addresses WHERE payment_order_id = $1")
        .bind(payment_order_id)
        .fetch_optional(conn)
        .await?;
    Ok(address)
}

/// Ends a lease. Whether the address rejoins the pool is decided inside the same statement that expires it, so a
/// deposit committed concurrently is always seen.
pub async fn release_address(
    payment_order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<ReceiveAddress>, StorageError> {
    let address = sqlx::query_as::<_, ReceiveAddress>(
        r#"
        UPDATE receive_addresses SET
            status = $1,
            payment_order_id = CASE
                WHEN amount_received = 0 AND last_used IS NULL THEN NULL
                ELSE payment_order_id
            END,
            updated_at = $2
        WHERE payment_order_id = $3 AND status != $1
        RETURNING *
        "#,
    )
    .bind(ReceiveAddressStatus::Expired)
    .bind(Utc::now())
    .bind(payment_order_id)
    .fetch_optional(conn)
    .await?;
    match &address {
        Some(a) if a.payment_order_id.is_none() => {
            debug!("🗃️ Address {} released by order #{payment_order_id} and returned to the pool", a.address)
        },
        Some(a) => debug!("🗃️ Address {} expired. It has seen deposits and will not be reused", a.address),
        None => trace!("🗃️ Order #{payment_order_id} holds no active address lease"),
    }
    Ok(address)
}

pub(crate) struct DepositBooking {
    pub address_id: i64,
    pub payment_order_id: i64,
    pub amount: Amount,
    pub block_number: i64,
    pub fully_funded: bool,
}

/// Books a deposit against the address, provided it is still actively leased to the deposit's payment order.
/// `last_indexed_block` never moves backwards.
pub(crate) async fn record_deposit(
    deposit: DepositBooking,
    conn: &mut SqliteConnection,
) -> Result<Option<ReceiveAddress>, StorageError> {
    let now = Utc::now();
    let status = if deposit.fully_funded { ReceiveAddressStatus::Used } else { ReceiveAddressStatus::PartiallyUsed };
    let address = sqlx::query_as::<_, ReceiveAddress>(
        r#"
        UPDATE receive_addresses SET
            status = $1,
            last_indexed_block = MAX(last_indexed_block, $2),
            amount_received = amount_received + $3,
            last_used = $4,
            updated_at = $4
        WHERE id = $5 AND payment_order_id = $6 AND status != $7
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(deposit.block_number)
    .bind(deposit.amount)
    .bind(now)
    .bind(deposit.address_id)
    .bind(deposit.payment_order_id)
    .bind(ReceiveAddressStatus::Expired)
    .fetch_optional(conn)
    .await?;
    Ok(address)
}
