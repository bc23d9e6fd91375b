use std::fmt::Display;

use agg_common::Amount;
use aggregator_engine::db_types::{LockOrderCancellation, LockPaymentOrder, PaymentOrder, ReceiveAddress};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// A merchant's request for a new payment order. Amounts are in micro-units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderRequest {
    /// Token symbol, e.g. `USDC`
    pub token: String,
    /// Network identifier, e.g. `base`
    pub network: String,
    pub amount: Amount,
    /// Fiat currency code the recipient is paid in
    pub currency: String,
    /// The rate quoted to the customer. Defaults to the currency's current market rate.
    #[serde(default)]
    pub rate: Option<Amount>,
    pub institution: String,
    pub account_identifier: String,
    pub account_name: String,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrderResponse {
    pub order: PaymentOrder,
    pub receive_address: Option<ReceiveAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOrderResponse {
    pub order: LockPaymentOrder,
    pub cancellations: Vec<LockOrderCancellation>,
}

/// The result of handing a transfer to the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DepositResponse {
    Recorded { order: LockPaymentOrder },
    Duplicate { order: LockPaymentOrder },
    Unconfirmed { confirmations: i64, required: i64 },
    NotLeased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillRequest {
    pub provider_id: i64,
    /// The payout reference from the provider's payment service
    pub tx_id: String,
    pub psp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub status: ValidationVerdict,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub provider_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub refund_tx_hash: String,
}

/// The body of an assignment notification sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub lock_order_id: i64,
    pub order_id: String,
    pub amount: Amount,
    pub rate: Amount,
    pub fiat_amount: Amount,
    pub currency: String,
    pub institution: String,
    pub account_identifier: String,
    pub account_name: String,
    pub bucket_id: i64,
}

impl From<&LockPaymentOrder> for OrderAssignment {
    fn from(order: &LockPaymentOrder) -> Self {
        Self {
            lock_order_id: order.id,
            order_id: order.order_id.clone(),
            amount: order.amount,
            rate: order.rate,
            fiat_amount: order.fiat_value(),
            currency: order.currency.clone(),
            institution: order.institution.clone(),
            account_identifier: order.account_identifier.clone(),
            account_name: order.account_name.clone(),
            bucket_id: order.provision_bucket_id.unwrap_or_default(),
        }
    }
}
