use thiserror::Error;

use crate::{
    db_types::{LockOrderStatus, PaymentOrderStatus},
    traits::StorageError,
};

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("Unknown fiat currency: {0}")]
    UnknownCurrency(String),
    #[error("Invalid provision bucket: {0}")]
    InvalidBucket(String),
    #[error("Bucket [{min}, {max}] overlaps existing bucket #{existing}")]
    OverlappingBucket { min: String, max: String, existing: i64 },
    #[error("Provider #{0} does not exist")]
    ProviderNotFound(i64),
    #[error("Invalid market rate: {0}")]
    InvalidRate(String),
    #[error("Invalid provider settings: {0}")]
    InvalidProviderSettings(String),
}

#[derive(Debug, Clone, Error)]
pub enum AllocatorError {
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("Payment order #{0} does not exist")]
    PaymentOrderNotFound(i64),
    #[error("Payment order #{0} is {1} and is no longer awaiting funds")]
    OrderNotAwaitingFunds(i64, PaymentOrderStatus),
    #[error("Invalid payment order: {0}")]
    InvalidOrder(String),
    #[error("Could not read the chain head: {0}")]
    ChainHeadUnavailable(String),
    #[error("Could not claim a fresh account index after {0} attempts")]
    IndexContention(u32),
}

#[derive(Debug, Clone, Error)]
pub enum IndexerError {
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("Invalid deposit: {0}")]
    InvalidDeposit(String),
    #[error("Payment order #{0} does not exist")]
    PaymentOrderNotFound(i64),
    #[error("There is no market rate for {0}")]
    NoMarketRate(String),
}

#[derive(Debug, Clone, Error)]
pub enum MatchingError {
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("Lock order #{0} does not exist")]
    LockOrderNotFound(i64),
    #[error("There is no market rate for {0}")]
    NoMarketRate(String),
}

#[derive(Debug, Clone, Error)]
pub enum FulfillmentError {
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("Lock order #{0} does not exist")]
    LockOrderNotFound(i64),
    #[error("Cannot {action} lock order #{id} while it is {status}")]
    InvalidTransition { id: i64, status: LockOrderStatus, action: &'static str },
    #[error("Lock order #{0} changed status concurrently. Try again.")]
    StatusConflict(i64),
    #[error("Lock order #{id} is not assigned to provider #{provider_id}")]
    NotAssignee { id: i64, provider_id: i64 },
    #[error("Lock order #{0} has no fulfillment awaiting validation")]
    NoPendingFulfillment(i64),
}

#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("Could not serialize webhook payload: {0}")]
    SerializationError(String),
    #[error("Could not sign webhook payload: {0}")]
    SignatureError(String),
}

impl From<serde_json::Error> for WebhookError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
