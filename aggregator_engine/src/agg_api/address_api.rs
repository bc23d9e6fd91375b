use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    agg_api::errors::AllocatorError,
    db_types::{AddressLease, NewPaymentOrder, PaymentOrder, PaymentOrderStatus, ReceiveAddress, ReceiveAddressStatus},
    events::{EventProducers, PaymentOrderExpiredEvent},
    traits::{AddressDeriver, AddressManagement, ChainHead, InsertResult, PaymentOrderManagement},
};

#[derive(Debug, Clone)]
pub struct AllocatorOptions {
    /// How long a leased address waits for funds before the order expires
    pub validity: Duration,
    /// How many times to retry minting when a concurrent allocator claims the same account index
    pub max_mint_attempts: u32,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self { validity: Duration::minutes(30), max_mint_attempts: 32 }
    }
}

/// `AddressAllocatorApi` leases deposit addresses to payment orders.
///
/// Addresses come from the recycling pool when possible; otherwise a new one is minted at the next account index.
/// Index uniqueness is enforced by the storage layer, and a lost race on an index is simply retried with the next one.
pub struct AddressAllocatorApi<B, C, D> {
    db: B,
    chain: C,
    deriver: D,
    options: AllocatorOptions,
    producers: EventProducers,
}

impl<B, C, D> Debug for AddressAllocatorApi<B, C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AddressAllocatorApi ({:?})", self.options)
    }
}

impl<B, C, D> AddressAllocatorApi<B, C, D> {
    pub fn new(db: B, chain: C, deriver: D, options: AllocatorOptions, producers: EventProducers) -> Self {
        Self { db, chain, deriver, options, producers }
    }
}

impl<B, C, D> AddressAllocatorApi<B, C, D>
where
    B: AddressManagement + PaymentOrderManagement,
    C: ChainHead,
    D: AddressDeriver,
{
    /// Stores a new payment order and leases a deposit address to it.
    pub async fn create_payment_order(
        &self,
        order: NewPaymentOrder,
    ) -> Result<(PaymentOrder, ReceiveAddress), AllocatorError> {
        if !order.amount.is_positive() {
            return Err(AllocatorError::InvalidOrder(format!("Amount must be positive, not {}", order.amount)));
        }
        if !order.rate.is_positive() {
            return Err(AllocatorError::InvalidOrder(format!("Rate must be positive, not {}", order.rate)));
        }
        let order = self.db.insert_payment_order(order).await?;
        let address = self.allocate_address(order.id).await?;
        // re-read so the caller sees the bound receive address
        let order = self.db.fetch_payment_order(order.id).await?.ok_or(AllocatorError::PaymentOrderNotFound(order.id))?;
        info!("🏷️ Payment order #{} for {} created. Deposit address: {}", order.id, order.amount, address.address);
        Ok((order, address))
    }

    /// Leases an address to the payment order. Calling this again for an order that already holds a lease returns the
    /// same address.
    pub async fn allocate_address(&self, payment_order_id: i64) -> Result<ReceiveAddress, AllocatorError> {
        let order = self
            .db
            .fetch_payment_order(payment_order_id)
            .await?
            .ok_or(AllocatorError::PaymentOrderNotFound(payment_order_id))?;
        if order.status != PaymentOrderStatus::Initiated {
            return Err(AllocatorError::OrderNotAwaitingFunds(order.id, order.status));
        }
        if let Some(existing) = self.db.fetch_address_for_order(order.id).await? {
            if existing.status == ReceiveAddressStatus::Expired {
                return Err(AllocatorError::OrderNotAwaitingFunds(order.id, order.status));
            }
            trace!("🏷️ Order #{} already holds {}", order.id, existing.address);
            return Ok(existing);
        }
        let chain_head =
            self.chain.current_block().await.map_err(|e| AllocatorError::ChainHeadUnavailable(e.to_string()))?;
        let lease = AddressLease { payment_order_id: order.id, chain_head, valid_until: Utc::now() + self.options.validity };
        if let Some(address) = self.db.lease_recycled_address(&lease).await? {
            debug!("🏷️ Order #{} leased recycled address {} at block {chain_head}", order.id, address.address);
            return Ok(address);
        }
        self.mint_address(&lease).await
    }

    async fn mint_address(&self, lease: &AddressLease) -> Result<ReceiveAddress, AllocatorError> {
        for attempt in 1..=self.options.max_mint_attempts {
            let index = self.db.next_account_index().await?;
            let address = self.deriver.derive_address(index);
            match self.db.insert_receive_address(&address, index, lease).await? {
                InsertResult::Inserted(a) => {
                    debug!("🏷️ Order #{} leased new address {} (index {index})", lease.payment_order_id, a.address);
                    return Ok(a);
                },
                InsertResult::AlreadyExists(a) if a.payment_order_id == Some(lease.payment_order_id) => {
                    debug!("🏷️ Order #{} was concurrently given {}", lease.payment_order_id, a.address);
                    return Ok(a);
                },
                InsertResult::AlreadyExists(_) => {
                    trace!("🏷️ Account index {index} was claimed concurrently (attempt {attempt}). Retrying.");
                },
            }
        }
        warn!(
            "🏷️ Gave up minting an address for order #{} after {} attempts",
            lease.payment_order_id, self.options.max_mint_attempts
        );
        Err(AllocatorError::IndexContention(self.options.max_mint_attempts))
    }

    pub async fn fetch_payment_order(&self, id: i64) -> Result<Option<PaymentOrder>, AllocatorError> {
        Ok(self.db.fetch_payment_order(id).await?)
    }

    pub async fn fetch_address_for_order(&self, payment_order_id: i64) -> Result<Option<ReceiveAddress>, AllocatorError> {
        Ok(self.db.fetch_address_for_order(payment_order_id).await?)
    }

    /// Ends the order's lease. The address only goes back into the pool if it never received funds.
    pub async fn release_address(&self, payment_order_id: i64) -> Result<Option<ReceiveAddress>, AllocatorError> {
        Ok(self.db.release_address(payment_order_id).await?)
    }

    /// Expires every `Initiated` order whose funding window closed before `now` and releases its address.
    ///
    /// An order that receives a deposit while this runs is left alone.
    pub async fn expire_unfunded_orders(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>, AllocatorError> {
        let candidates = self.db.fetch_unfunded_expired_orders(now).await?;
        let mut expired = Vec::with_capacity(candidates.len());
        for order in candidates {
            let updated = self
                .db
                .update_payment_order_status(order.id, PaymentOrderStatus::Initiated, PaymentOrderStatus::Expired)
                .await?;
            let Some(order) = updated else {
                debug!("🏷️ Order #{} was funded before it could expire", order.id);
                continue;
            };
            self.db.release_address(order.id).await?;
            info!("🏷️ Payment order #{} expired without receiving funds", order.id);
            let event = PaymentOrderExpiredEvent { payment_order: order.clone(), expired_at: now };
            self.producers.publish_payment_order_expired(event).await;
            expired.push(order);
        }
        Ok(expired)
    }
}
