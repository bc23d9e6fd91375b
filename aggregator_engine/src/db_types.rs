//! Data types shared between the storage backends and the aggregator APIs.
//!
//! Status enums are stored as TEXT columns using their variant names, so `Display` and `FromStr` must round-trip.
use std::{fmt::Display, str::FromStr};

use agg_common::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {0}: {1}")]
pub struct ConversionError(pub &'static str, pub String);

/// Implements `Display`, `FromStr` and a lenient `From<String>` for a unit-only enum, using the variant names as the
/// textual representation.
macro_rules! text_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, stringify!($variant)),)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    s => Err(ConversionError(stringify!($name), s.to_string())),
                }
            }
        }
    };
}

//--------------------------------------   Reference catalog   -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Network {
    pub id: i64,
    /// A short unique name, e.g. `base` or `arbitrum-one`
    pub identifier: String,
    pub chain_id: i64,
    pub block_time_secs: i64,
    pub is_testnet: bool,
}

#[derive(Debug, Clone)]
pub struct NewNetwork {
    pub identifier: String,
    pub chain_id: i64,
    pub block_time_secs: i64,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    pub symbol: String,
    pub contract_address: String,
    pub decimals: i64,
    pub network_id: i64,
    pub is_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct NewToken {
    pub symbol: String,
    pub contract_address: String,
    pub decimals: i64,
    pub network_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FiatCurrency {
    pub id: i64,
    /// ISO 4217 code, e.g. `NGN`
    pub code: String,
    pub name: String,
    pub symbol: String,
    /// Current market rate, in units of this currency per unit of a (USD-pegged) token.
    pub market_rate: Amount,
    pub is_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFiatCurrency {
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub market_rate: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum InstitutionType {
    Bank,
    MobileMoney,
}

text_enum!(InstitutionType { Bank, MobileMoney });

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Institution {
    pub id: i64,
    /// Payout institution code, e.g. a bank sort code or SWIFT-like identifier
    pub code: String,
    pub name: String,
    pub institution_type: InstitutionType,
    pub currency_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewInstitution {
    pub code: String,
    pub name: String,
    pub institution_type: InstitutionType,
    pub currency_id: i64,
}

//--------------------------------------     PaymentOrder      -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PaymentOrderStatus {
    /// Created by the merchant, waiting for funds to arrive at the receive address
    Initiated,
    /// Funds have been received and a lock order is being settled
    Pending,
    Settled,
    Expired,
    Refunded,
}

text_enum!(PaymentOrderStatus { Initiated, Pending, Settled, Expired, Refunded });

impl PaymentOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Expired | Self::Refunded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: i64,
    pub token_id: i64,
    pub amount: Amount,
    pub amount_paid: Amount,
    pub rate: Amount,
    pub tx_hash: Option<String>,
    pub status: PaymentOrderStatus,
    pub receive_address_text: Option<String>,
    pub institution: String,
    pub account_identifier: String,
    pub account_name: String,
    pub currency: String,
    pub memo: Option<String>,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn outstanding(&self) -> Amount {
        self.amount - self.amount_paid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentOrder {
    pub token_id: i64,
    pub amount: Amount,
    pub rate: Amount,
    pub institution: String,
    pub account_identifier: String,
    pub account_name: String,
    /// Fiat currency code the recipient is paid in
    pub currency: String,
    pub memo: Option<String>,
    pub webhook_url: Option<String>,
}

//--------------------------------------    ReceiveAddress     -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ReceiveAddressStatus {
    Unused,
    PartiallyUsed,
    Used,
    Expired,
}

text_enum!(ReceiveAddressStatus { Unused, PartiallyUsed, Used, Expired });

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ReceiveAddress {
    pub id: i64,
    pub address: String,
    pub account_index: i64,
    pub status: ReceiveAddressStatus,
    /// The order currently (or last) holding the lease. `None` for addresses sitting in the recycling pool.
    pub payment_order_id: Option<i64>,
    pub last_indexed_block: i64,
    pub last_used: Option<DateTime<Utc>>,
    /// Total amount ever deposited to this address. Addresses with deposits are never recycled.
    pub amount_received: Amount,
    pub valid_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReceiveAddress {
    pub fn has_activity(&self) -> bool {
        self.amount_received.is_positive() || self.last_used.is_some()
    }
}

/// The parameters for leasing an address to an order.
#[derive(Debug, Clone)]
pub struct AddressLease {
    pub payment_order_id: i64,
    pub chain_head: i64,
    pub valid_until: DateTime<Utc>,
}

//--------------------------------------   LockPaymentOrder    -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum LockOrderStatus {
    Pending,
    Processing,
    Fulfilled,
    Validated,
    Cancelled,
    Refunded,
}

text_enum!(LockOrderStatus { Pending, Processing, Fulfilled, Validated, Cancelled, Refunded });

impl LockOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validated | Self::Refunded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LockPaymentOrder {
    pub id: i64,
    /// External correlation id, derived deterministically from the funding transfer
    pub order_id: String,
    pub payment_order_id: i64,
    pub token_id: i64,
    pub amount: Amount,
    pub rate: Amount,
    /// The share of the parent payment order that this lock order settles, as a percentage
    pub order_percent: Amount,
    pub currency: String,
    pub institution: String,
    pub account_identifier: String,
    pub account_name: String,
    pub status: LockOrderStatus,
    pub cancellation_count: i64,
    pub cancellation_reasons: Json<Vec<String>>,
    pub is_refunded: bool,
    pub refund_tx_hash: Option<String>,
    pub is_refund_confirmed: bool,
    pub block_number: i64,
    pub tx_hash: String,
    pub provision_bucket_id: Option<i64>,
    pub provider_id: Option<i64>,
    /// Number of matching passes that failed to find a provider
    pub match_attempts: i64,
    pub needs_manual_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LockPaymentOrder {
    /// The order value in fiat, which decides the provision bucket.
    pub fn fiat_value(&self) -> Amount {
        self.amount.mul_rate(self.rate)
    }
}

#[derive(Debug, Clone)]
pub struct NewLockPaymentOrder {
    pub order_id: String,
    pub payment_order_id: i64,
    pub token_id: i64,
    pub amount: Amount,
    pub rate: Amount,
    pub order_percent: Amount,
    pub currency: String,
    pub institution: String,
    pub account_identifier: String,
    pub account_name: String,
    pub block_number: i64,
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LockOrderCancellation {
    pub id: i64,
    pub lock_order_id: i64,
    pub provider_id: Option<i64>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------   ProvisionBucket     -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ProvisionBucket {
    pub id: i64,
    pub currency_id: i64,
    pub min_amount: Amount,
    pub max_amount: Amount,
    pub created_at: DateTime<Utc>,
}

impl ProvisionBucket {
    pub fn contains(&self, amount: Amount) -> bool {
        self.min_amount <= amount && amount <= self.max_amount
    }

    /// True if the two closed ranges share more than a single boundary point.
    pub fn overlaps(&self, min_amount: Amount, max_amount: Amount) -> bool {
        self.min_amount < max_amount && min_amount < self.max_amount
    }
}

#[derive(Debug, Clone)]
pub struct NewProvisionBucket {
    pub currency_id: i64,
    pub min_amount: Amount,
    pub max_amount: Amount,
}

//--------------------------------------   ProviderProfile     -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ProvisionMode {
    Auto,
    Manual,
}

text_enum!(ProvisionMode { Auto, Manual });

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: i64,
    pub trading_name: String,
    pub currency_id: i64,
    pub provision_mode: ProvisionMode,
    pub is_partner: bool,
    pub is_available: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_assigned_at: Option<DateTime<Utc>>,
    /// Where assignment notifications are sent
    pub callback_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProviderProfile {
    pub trading_name: String,
    pub currency_id: i64,
    pub provision_mode: ProvisionMode,
    pub is_partner: bool,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ConversionRateType {
    /// The provider quotes a fixed rate
    Fixed,
    /// The provider quotes the market rate plus a margin
    Floating,
}

text_enum!(ConversionRateType { Fixed, Floating });

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ProviderOrderToken {
    pub id: i64,
    pub provider_id: i64,
    pub token_id: i64,
    pub min_order_amount: Amount,
    pub max_order_amount: Amount,
    pub conversion_rate_type: ConversionRateType,
    pub fixed_conversion_rate: Amount,
    /// Margin added to the market rate for floating quotes. May be negative.
    pub floating_conversion_rate: Amount,
    /// Tolerated deviation from the order's rate, in basis points
    pub rate_slippage_bps: i64,
    pub address: String,
    pub network: String,
}

impl ProviderOrderToken {
    pub fn accepts_amount(&self, amount: Amount) -> bool {
        self.min_order_amount <= amount && amount <= self.max_order_amount
    }

    /// The rate this provider would pay out at, given the current market rate.
    pub fn effective_rate(&self, market_rate: Amount) -> Amount {
        match self.conversion_rate_type {
            ConversionRateType::Fixed => self.fixed_conversion_rate,
            ConversionRateType::Floating => market_rate + self.floating_conversion_rate,
        }
    }

    /// True if this provider's effective rate is within its slippage tolerance of `order_rate`.
    pub fn rate_within_slippage(&self, order_rate: Amount, market_rate: Amount) -> bool {
        let deviation = (self.effective_rate(market_rate) - order_rate).abs();
        deviation <= order_rate.mul_bps(self.rate_slippage_bps)
    }
}

#[derive(Debug, Clone)]
pub struct NewProviderOrderToken {
    pub provider_id: i64,
    pub token_id: i64,
    pub min_order_amount: Amount,
    pub max_order_amount: Amount,
    pub conversion_rate_type: ConversionRateType,
    pub fixed_conversion_rate: Amount,
    pub floating_conversion_rate: Amount,
    pub rate_slippage_bps: i64,
    pub address: String,
    pub network: String,
}

/// A bucket member together with its settings for the token being matched.
#[derive(Debug, Clone)]
pub struct ProviderCandidate {
    pub provider: ProviderProfile,
    pub token: ProviderOrderToken,
}

//--------------------------------------  LockOrderFulfillment -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pending,
    Success,
    Failed,
}

text_enum!(ValidationStatus { Pending, Success, Failed });

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LockOrderFulfillment {
    pub id: i64,
    pub lock_order_id: i64,
    pub tx_id: String,
    pub psp: String,
    pub validation_status: ValidationStatus,
    pub validation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------  WebhookRetryAttempt  -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum WebhookAttemptStatus {
    /// A retry is scheduled for `next_retry_time`
    Pending,
    Success,
    /// The destination can never accept this delivery (e.g. the URL is malformed); no retries are scheduled
    Failed,
    /// `max_attempts` deliveries failed
    Exhausted,
}

text_enum!(WebhookAttemptStatus { Pending, Success, Failed, Exhausted });

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct WebhookRetryAttempt {
    pub id: i64,
    pub event: String,
    pub url: String,
    /// The exact bytes that were signed, serialized once at enqueue time
    pub payload: String,
    pub signature: String,
    pub attempt_number: i64,
    pub next_retry_time: DateTime<Utc>,
    pub status: WebhookAttemptStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookRetryAttempt {
    pub event: String,
    pub url: String,
    pub payload: String,
    pub signature: String,
    pub next_retry_time: DateTime<Utc>,
    /// `Pending` to schedule a retry, or a terminal status when the first delivery already settled the matter
    pub status: WebhookAttemptStatus,
    pub last_error: Option<String>,
}
