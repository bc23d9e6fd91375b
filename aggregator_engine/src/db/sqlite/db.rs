use std::fmt::Debug;

use agg_common::Amount;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate, SqlitePool};

use super::{addresses, catalog, db_url, lock_orders, new_pool, payment_orders, providers, webhooks};
use crate::{
    db_types::{
        AddressLease,
        FiatCurrency,
        Institution,
        LockOrderCancellation,
        LockOrderFulfillment,
        LockOrderStatus,
        LockPaymentOrder,
        Network,
        NewFiatCurrency,
        NewInstitution,
        NewLockPaymentOrder,
        NewNetwork,
        NewPaymentOrder,
        NewProviderOrderToken,
        NewProviderProfile,
        NewProvisionBucket,
        NewToken,
        NewWebhookRetryAttempt,
        PaymentOrder,
        PaymentOrderStatus,
        ProviderCandidate,
        ProviderOrderToken,
        ProviderProfile,
        ProvisionBucket,
        ReceiveAddress,
        Token,
        ValidationStatus,
        WebhookAttemptStatus,
        WebhookRetryAttempt,
    },
    traits::{
        AddressManagement,
        AggregatorDatabase,
        Cancellation,
        CatalogManagement,
        InsertResult,
        LockOrderManagement,
        MarketRates,
        PaymentOrderManagement,
        ProviderManagement,
        StorageError,
        WebhookFailure,
        WebhookManagement,
    },
};

const DEFAULT_MAX_CONNECTIONS: u32 = 25;

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `AGG_DATABASE_URL`
    pub async fn new() -> Result<Self, StorageError> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date. Safe to call on every start-up.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        migrate!("./src/db/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {e}")))?;
        info!("🗃️ Database migrations are up to date");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl AggregatorDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

impl MarketRates for SqliteDatabase {
    async fn market_rate(&self, currency: &str) -> Result<Option<Amount>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let currency = catalog::fetch_fiat_currency(currency, &mut conn).await?;
        Ok(currency.filter(|c| c.is_enabled).map(|c| c.market_rate))
    }
}

impl CatalogManagement for SqliteDatabase {
    async fn insert_network(&self, network: NewNetwork) -> Result<InsertResult<Network>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = catalog::idempotent_insert_network(network, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_network(&self, identifier: &str) -> Result<Option<Network>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_network(identifier, &mut conn).await
    }

    async fn insert_token(&self, token: NewToken) -> Result<InsertResult<Token>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = catalog::idempotent_insert_token(token, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_token(&self, id: i64) -> Result<Option<Token>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_token(id, &mut conn).await
    }

    async fn fetch_token_by_symbol(&self, symbol: &str, network_id: i64) -> Result<Option<Token>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_token_by_symbol(symbol, network_id, &mut conn).await
    }

    async fn insert_fiat_currency(&self, currency: NewFiatCurrency) -> Result<InsertResult<FiatCurrency>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = catalog::idempotent_insert_fiat_currency(currency, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_fiat_currency(&self, code: &str) -> Result<Option<FiatCurrency>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_fiat_currency(code, &mut conn).await
    }

    async fn update_market_rate(&self, code: &str, rate: Amount) -> Result<Option<FiatCurrency>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = catalog::update_market_rate(code, rate, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn insert_institution(
        &self,
        institution: NewInstitution,
    ) -> Result<InsertResult<Institution>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = catalog::idempotent_insert_institution(institution, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_institution(&self, code: &str) -> Result<Option<Institution>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_institution(code, &mut conn).await
    }

    async fn insert_provision_bucket(&self, bucket: NewProvisionBucket) -> Result<ProvisionBucket, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = catalog::insert_provision_bucket(bucket, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_provision_bucket(&self, id: i64) -> Result<Option<ProvisionBucket>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_provision_bucket(id, &mut conn).await
    }

    async fn fetch_provision_buckets(&self, currency_id: i64) -> Result<Vec<ProvisionBucket>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_provision_buckets(currency_id, &mut conn).await
    }
}

impl PaymentOrderManagement for SqliteDatabase {
    async fn insert_payment_order(&self, order: NewPaymentOrder) -> Result<PaymentOrder, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = payment_orders::insert_payment_order(order, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_payment_order(&self, id: i64) -> Result<Option<PaymentOrder>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        payment_orders::fetch_payment_order(id, &mut conn).await
    }

    async fn fetch_unfunded_expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        payment_orders::fetch_unfunded_expired_orders(now, &mut conn).await
    }

    async fn update_payment_order_status(
        &self,
        id: i64,
        expected: PaymentOrderStatus,
        new_status: PaymentOrderStatus,
    ) -> Result<Option<PaymentOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = payment_orders::update_status(id, expected, new_status, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }
}

impl AddressManagement for SqliteDatabase {
    async fn lease_recycled_address(&self, lease: &AddressLease) -> Result<Option<ReceiveAddress>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let address = addresses::lease_recycled_address(lease, &mut tx).await?;
        if let Some(a) = &address {
            payment_orders::set_receive_address(lease.payment_order_id, &a.address, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(address)
    }

    async fn next_account_index(&self) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        addresses::next_account_index(&mut conn).await
    }

    async fn insert_receive_address(
        &self,
        address: &str,
        account_index: i64,
        lease: &AddressLease,
    ) -> Result<InsertResult<ReceiveAddress>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = addresses::idempotent_insert(address, account_index, lease, &mut tx).await?;
        if let InsertResult::Inserted(a) = &result {
            payment_orders::set_receive_address(lease.payment_order_id, &a.address, &mut tx).await?;
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(result)
    }

    async fn fetch_receive_address(&self, address: &str) -> Result<Option<ReceiveAddress>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        addresses::fetch_receive_address(address, &mut conn).await
    }

    async fn fetch_address_for_order(&self, payment_order_id: i64) -> Result<Option<ReceiveAddress>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        addresses::fetch_address_for_order(payment_order_id, &mut conn).await
    }

    async fn release_address(&self, payment_order_id: i64) -> Result<Option<ReceiveAddress>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = addresses::release_address(payment_order_id, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }
}

impl LockOrderManagement for SqliteDatabase {
    /// Takes a confirmed deposit, and in a single atomic transaction,
    /// * stores the lock order. If one already exists for the transaction hash, nothing further is done.
    /// * credits the payment order, moving it to `Pending` on its first deposit
    /// * books the deposit against the receive address
    async fn record_deposit(
        &self,
        address_id: i64,
        order: NewLockPaymentOrder,
    ) -> Result<Option<InsertResult<LockPaymentOrder>>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let (amount, block_number, payment_order_id) = (order.amount, order.block_number, order.payment_order_id);
        let lock_order = match lock_orders::idempotent_insert(order, &mut tx).await? {
            InsertResult::Inserted(o) => o,
            existing => {
                tx.rollback().await?;
                return Ok(Some(existing));
            },
        };
        let payment_order =
            payment_orders::credit_deposit(payment_order_id, amount, &lock_order.tx_hash, &mut tx).await?;
        let fully_funded = payment_order.outstanding() <= Amount::zero();
        let deposit = addresses::DepositBooking { address_id, payment_order_id, amount, block_number, fully_funded };
        let Some(address) = addresses::record_deposit(deposit, &mut tx).await? else {
            tx.rollback().await?;
            debug!("🗃️ Address #{address_id} is no longer leased to payment order #{payment_order_id}");
            return Ok(None);
        };
        tx.commit().await?;
        debug!(
            "🗃️ Deposit {} of {amount} to {} recorded as lock order #{}. Payment order #{} has received {} of {}",
            lock_order.tx_hash, address.address, lock_order.id, payment_order.id, payment_order.amount_paid,
            payment_order.amount
        );
        Ok(Some(InsertResult::Inserted(lock_order)))
    }

    async fn fetch_lock_order(&self, id: i64) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_lock_order(id, &mut conn).await
    }

    async fn fetch_lock_order_by_tx_hash(&self, tx_hash: &str) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_by_tx_hash(tx_hash, &mut conn).await
    }

    async fn fetch_matchable_orders(&self, limit: i64) -> Result<Vec<LockPaymentOrder>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_matchable_orders(limit, &mut conn).await
    }

    async fn fetch_stale_processing_orders(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<LockPaymentOrder>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_stale_processing_orders(older_than, &mut conn).await
    }

    async fn fetch_orders_for_manual_review(&self) -> Result<Vec<LockPaymentOrder>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_orders_for_manual_review(&mut conn).await
    }

    async fn assign_lock_order(
        &self,
        id: i64,
        provider_id: i64,
        bucket_id: i64,
    ) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let order = match lock_orders::assign(id, provider_id, bucket_id, &mut tx).await? {
            Some(o) => o,
            None => {
                tx.rollback().await?;
                return Ok(None);
            },
        };
        providers::stamp_last_assigned(provider_id, order.updated_at, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Lock order #{id} assigned to provider #{provider_id} from bucket #{bucket_id}");
        Ok(Some(order))
    }

    async fn record_match_failure(&self, id: i64, max_sweeps: i64) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = lock_orders::record_match_failure(id, max_sweeps, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fulfill_lock_order(
        &self,
        id: i64,
        tx_id: &str,
        psp: &str,
    ) -> Result<Option<(LockPaymentOrder, LockOrderFulfillment)>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let order =
            match lock_orders::update_status(id, LockOrderStatus::Processing, LockOrderStatus::Fulfilled, &mut tx)
                .await?
            {
                Some(o) => o,
                None => {
                    tx.rollback().await?;
                    return Ok(None);
                },
            };
        let fulfillment = lock_orders::insert_fulfillment(id, tx_id, psp, &mut tx).await?;
        tx.commit().await?;
        Ok(Some((order, fulfillment)))
    }

    async fn fetch_pending_fulfillment(
        &self,
        lock_order_id: i64,
    ) -> Result<Option<LockOrderFulfillment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_pending_fulfillment(lock_order_id, &mut conn).await
    }

    async fn fetch_fulfillments(&self, lock_order_id: i64) -> Result<Vec<LockOrderFulfillment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_fulfillments(lock_order_id, &mut conn).await
    }

    async fn validate_lock_order(
        &self,
        id: i64,
        fulfillment_id: i64,
    ) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let order =
            match lock_orders::update_status(id, LockOrderStatus::Fulfilled, LockOrderStatus::Validated, &mut tx)
                .await?
            {
                Some(o) => o,
                None => {
                    tx.rollback().await?;
                    return Ok(None);
                },
            };
        if !lock_orders::close_fulfillment(fulfillment_id, id, ValidationStatus::Success, None, &mut tx).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        let settled = lock_orders::settle_payment_order_if_complete(order.payment_order_id, &mut tx).await?;
        tx.commit().await?;
        if settled {
            debug!("🗃️ Payment order #{} is settled", order.payment_order_id);
        }
        Ok(Some(order))
    }

    async fn cancel_lock_order(&self, cancellation: Cancellation) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let order = match lock_orders::apply_cancellation(&cancellation, &mut tx).await? {
            Some(o) => o,
            None => {
                tx.rollback().await?;
                return Ok(None);
            },
        };
        let id = cancellation.lock_order_id;
        lock_orders::insert_cancellation(id, cancellation.provider_id, &cancellation.reason, &mut tx).await?;
        if let Some(fulfillment_id) = cancellation.failed_fulfillment_id {
            let reason = Some(cancellation.reason.as_str());
            if !lock_orders::close_fulfillment(fulfillment_id, id, ValidationStatus::Failed, reason, &mut tx).await? {
                tx.rollback().await?;
                return Ok(None);
            }
        }
        tx.commit().await?;
        debug!(
            "🗃️ Lock order #{id}: {} -> {} after cancellation {} ({})",
            cancellation.expected_status, order.status, order.cancellation_count, cancellation.reason
        );
        Ok(Some(order))
    }

    async fn fetch_cancellations(&self, lock_order_id: i64) -> Result<Vec<LockOrderCancellation>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        lock_orders::fetch_cancellations(lock_order_id, &mut conn).await
    }

    async fn refund_lock_order(&self, id: i64, refund_tx_hash: &str) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let order = match lock_orders::mark_refunded(id, refund_tx_hash, &mut tx).await? {
            Some(o) => o,
            None => {
                tx.rollback().await?;
                return Ok(None);
            },
        };
        let refunded = lock_orders::refund_payment_order_if_complete(order.payment_order_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Lock order #{id} refunded in {refund_tx_hash}");
        if refunded {
            debug!("🗃️ Payment order #{} is fully refunded", order.payment_order_id);
        }
        Ok(Some(order))
    }

    async fn confirm_refund(&self, id: i64) -> Result<Option<LockPaymentOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = lock_orders::confirm_refund(id, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }
}

impl ProviderManagement for SqliteDatabase {
    async fn insert_provider(&self, provider: NewProviderProfile) -> Result<ProviderProfile, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = providers::insert_provider(provider, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_provider(&self, id: i64) -> Result<Option<ProviderProfile>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        providers::fetch_provider(id, &mut conn).await
    }

    async fn set_provider_availability(
        &self,
        id: i64,
        is_available: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<Option<ProviderProfile>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = providers::set_availability(id, is_available, seen_at, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn add_provider_to_bucket(&self, provider_id: i64, bucket_id: i64) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = providers::add_to_bucket(provider_id, bucket_id, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn remove_provider_from_bucket(&self, provider_id: i64, bucket_id: i64) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = providers::remove_from_bucket(provider_id, bucket_id, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn upsert_provider_order_token(
        &self,
        settings: NewProviderOrderToken,
    ) -> Result<ProviderOrderToken, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = providers::upsert_order_token(settings, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_bucket_candidates(
        &self,
        bucket_id: i64,
        token_id: i64,
    ) -> Result<Vec<ProviderCandidate>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        providers::fetch_bucket_candidates(bucket_id, token_id, &mut conn).await
    }
}

impl WebhookManagement for SqliteDatabase {
    async fn insert_webhook_attempt(
        &self,
        attempt: NewWebhookRetryAttempt,
    ) -> Result<WebhookRetryAttempt, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = webhooks::insert_attempt(attempt, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_webhook_attempt(&self, id: i64) -> Result<Option<WebhookRetryAttempt>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        webhooks::fetch_attempt(id, &mut conn).await
    }

    async fn fetch_due_webhook_attempts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookRetryAttempt>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        webhooks::fetch_due_attempts(now, limit, &mut conn).await
    }

    async fn fetch_webhook_attempts_by_status(
        &self,
        status: WebhookAttemptStatus,
    ) -> Result<Vec<WebhookRetryAttempt>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        webhooks::fetch_attempts_by_status(status, &mut conn).await
    }

    async fn claim_webhook_attempt(
        &self,
        id: i64,
        expected_next_retry: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = webhooks::claim_attempt(id, expected_next_retry, lease_until, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn record_webhook_success(
        &self,
        id: i64,
        expected_attempt_number: i64,
    ) -> Result<Option<WebhookRetryAttempt>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = webhooks::record_success(id, expected_attempt_number, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn record_webhook_failure(
        &self,
        failure: WebhookFailure,
    ) -> Result<Option<WebhookRetryAttempt>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = webhooks::record_failure(failure, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }
}
