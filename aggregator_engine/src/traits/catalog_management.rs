use agg_common::Amount;

use crate::{
    db_types::{
        FiatCurrency,
        Institution,
        Network,
        NewFiatCurrency,
        NewInstitution,
        NewNetwork,
        NewProvisionBucket,
        NewToken,
        ProvisionBucket,
        Token,
    },
    traits::{InsertResult, StorageError},
};

/// Static configuration: supported chains, tokens, currencies, payout institutions and provision buckets.
///
/// All inserts are idempotent on their natural keys.
#[allow(async_fn_in_trait)]
pub trait CatalogManagement {
    async fn insert_network(&self, network: NewNetwork) -> Result<InsertResult<Network>, StorageError>;

    async fn fetch_network(&self, identifier: &str) -> Result<Option<Network>, StorageError>;

    async fn insert_token(&self, token: NewToken) -> Result<InsertResult<Token>, StorageError>;

    async fn fetch_token(&self, id: i64) -> Result<Option<Token>, StorageError>;

    async fn fetch_token_by_symbol(&self, symbol: &str, network_id: i64) -> Result<Option<Token>, StorageError>;

    async fn insert_fiat_currency(&self, currency: NewFiatCurrency) -> Result<InsertResult<FiatCurrency>, StorageError>;

    async fn fetch_fiat_currency(&self, code: &str) -> Result<Option<FiatCurrency>, StorageError>;

    /// Sets the market rate for the currency identified by `code`. Returns the updated record, or `None` if the currency
    /// is unknown.
    async fn update_market_rate(&self, code: &str, rate: Amount) -> Result<Option<FiatCurrency>, StorageError>;

    async fn insert_institution(&self, institution: NewInstitution)
        -> Result<InsertResult<Institution>, StorageError>;

    async fn fetch_institution(&self, code: &str) -> Result<Option<Institution>, StorageError>;

    /// Stores a new bucket. Buckets are immutable once created, except for their provider membership.
    async fn insert_provision_bucket(&self, bucket: NewProvisionBucket) -> Result<ProvisionBucket, StorageError>;

    async fn fetch_provision_bucket(&self, id: i64) -> Result<Option<ProvisionBucket>, StorageError>;

    /// All buckets for the currency, ordered by `min_amount` ascending.
    async fn fetch_provision_buckets(&self, currency_id: i64) -> Result<Vec<ProvisionBucket>, StorageError>;
}
