use std::fmt::Debug;

use agg_common::Amount;
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    agg_api::errors::IndexerError,
    db_types::{LockPaymentOrder, NewLockPaymentOrder, ReceiveAddressStatus},
    events::{EventProducers, LockOrderCreatedEvent},
    helpers::lock_order_id,
    traits::{AddressManagement, InsertResult, LockOrderManagement, MarketRates, PaymentOrderManagement},
};

/// A transfer to one of our deposit addresses, as reported by the chain scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub to_address: String,
    pub amount: Amount,
    pub tx_hash: String,
    pub block_number: i64,
    pub confirmations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    /// A new lock order was created
    Recorded(LockPaymentOrder),
    /// The transfer was seen before. Nothing changed.
    Duplicate(LockPaymentOrder),
    /// Not deep enough yet. The scanner will deliver it again.
    Unconfirmed { confirmations: i64, required: i64 },
    /// The address is not ours, or its lease has ended
    NotLeased,
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub min_confirmations: i64,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self { min_confirmations: 1 }
    }
}

/// `ChainIndexerApi` is the bookkeeping side of chain scanning: it turns confirmed transfers to leased addresses into
/// lock orders.
///
/// Every call is safe to repeat with the same inputs. The transaction hash is the idempotency key, so redelivered
/// blocks after a restart or a reorg never produce a second lock order or move `last_indexed_block` again.
pub struct ChainIndexerApi<B> {
    db: B,
    options: IndexerOptions,
    producers: EventProducers,
}

impl<B> Debug for ChainIndexerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChainIndexerApi ({:?})", self.options)
    }
}

impl<B> ChainIndexerApi<B> {
    pub fn new(db: B, options: IndexerOptions, producers: EventProducers) -> Self {
        Self { db, options, producers }
    }
}

impl<B> ChainIndexerApi<B>
where B: AddressManagement + PaymentOrderManagement + LockOrderManagement + MarketRates
{
    pub async fn record_deposit(&self, deposit: Deposit) -> Result<DepositOutcome, IndexerError> {
        if deposit.confirmations < self.options.min_confirmations {
            trace!(
                "⛓️ Deposit {} has {} of {} confirmations. Waiting.",
                deposit.tx_hash,
                deposit.confirmations,
                self.options.min_confirmations
            );
            return Ok(DepositOutcome::Unconfirmed {
                confirmations: deposit.confirmations,
                required: self.options.min_confirmations,
            });
        }
        if !deposit.amount.is_positive() {
            return Err(IndexerError::InvalidDeposit(format!("{} has a non-positive amount", deposit.tx_hash)));
        }
        let to_address = deposit.to_address.trim().to_lowercase();
        let Some(address) = self.db.fetch_receive_address(&to_address).await? else {
            warn!("⛓️ Deposit {} is to {to_address}, which is not one of our addresses. Ignoring.", deposit.tx_hash);
            return Ok(DepositOutcome::NotLeased);
        };
        if let Some(existing) = self.db.fetch_lock_order_by_tx_hash(&deposit.tx_hash).await? {
            debug!("⛓️ Deposit {} was already recorded as lock order #{}", deposit.tx_hash, existing.id);
            return Ok(DepositOutcome::Duplicate(existing));
        }
        let payment_order_id = match address.payment_order_id {
            Some(id) if address.status != ReceiveAddressStatus::Expired => id,
            _ => {
                warn!("⛓️ Deposit {} is to {to_address}, which is not leased to any order. Ignoring.", deposit.tx_hash);
                return Ok(DepositOutcome::NotLeased);
            },
        };
        let payment_order = self
            .db
            .fetch_payment_order(payment_order_id)
            .await?
            .ok_or(IndexerError::PaymentOrderNotFound(payment_order_id))?;
        let rate = self
            .db
            .market_rate(&payment_order.currency)
            .await?
            .ok_or_else(|| IndexerError::NoMarketRate(payment_order.currency.clone()))?;
        let order = NewLockPaymentOrder {
            order_id: lock_order_id(&deposit.tx_hash, &to_address),
            payment_order_id,
            token_id: payment_order.token_id,
            amount: deposit.amount,
            rate,
            order_percent: deposit.amount.percent_of(payment_order.amount),
            currency: payment_order.currency.clone(),
            institution: payment_order.institution.clone(),
            account_identifier: payment_order.account_identifier.clone(),
            account_name: payment_order.account_name.clone(),
            block_number: deposit.block_number,
            tx_hash: deposit.tx_hash.clone(),
        };
        match self.db.record_deposit(address.id, order).await? {
            None => {
                warn!(
                    "⛓️ Deposit {} is to {to_address}, whose lease moved away from payment order #{payment_order_id}. \
                     Ignoring.",
                    deposit.tx_hash
                );
                Ok(DepositOutcome::NotLeased)
            },
            Some(InsertResult::Inserted(order)) => {
                info!(
                    "⛓️ Deposit {} of {} for payment order #{payment_order_id} recorded as lock order #{}",
                    order.tx_hash, order.amount, order.id
                );
                let payment_order = self
                    .db
                    .fetch_payment_order(payment_order_id)
                    .await?
                    .ok_or(IndexerError::PaymentOrderNotFound(payment_order_id))?;
                let event = LockOrderCreatedEvent { order: order.clone(), payment_order };
                self.producers.publish_lock_order_created(event).await;
                Ok(DepositOutcome::Recorded(order))
            },
            Some(InsertResult::AlreadyExists(order)) => {
                debug!("⛓️ Deposit {} was recorded concurrently as lock order #{}", order.tx_hash, order.id);
                Ok(DepositOutcome::Duplicate(order))
            },
        }
    }
}
