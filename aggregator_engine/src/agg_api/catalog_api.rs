use std::fmt::Debug;

use agg_common::{Amount, UNIT};
use chrono::Utc;
use log::*;

use crate::{
    agg_api::errors::CatalogError,
    db_types::{
        FiatCurrency,
        Institution,
        Network,
        NewFiatCurrency,
        NewInstitution,
        NewNetwork,
        NewProviderOrderToken,
        NewProviderProfile,
        NewProvisionBucket,
        NewToken,
        ProviderOrderToken,
        ProviderProfile,
        ProvisionBucket,
        Token,
    },
    traits::{CatalogManagement, InsertResult, ProviderManagement},
};

/// A hole in a currency's bucket coverage: amounts strictly between `after` and `before` are not covered by any bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingGap {
    pub after: Amount,
    pub before: Amount,
}

/// `CatalogApi` manages the reference data the rest of the aggregator reads: networks, tokens, fiat currencies and
/// their market rates, payout institutions, provision buckets and the liquidity providers that sit in them.
pub struct CatalogApi<B> {
    db: B,
}

impl<B> Debug for CatalogApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CatalogApi")
    }
}

impl<B> CatalogApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> CatalogApi<B>
where B: CatalogManagement + ProviderManagement
{
    pub async fn add_network(&self, network: NewNetwork) -> Result<Network, CatalogError> {
        Ok(self.db.insert_network(network).await?.into_inner())
    }

    pub async fn network(&self, identifier: &str) -> Result<Option<Network>, CatalogError> {
        Ok(self.db.fetch_network(identifier).await?)
    }

    pub async fn add_token(&self, token: NewToken) -> Result<Token, CatalogError> {
        Ok(self.db.insert_token(token).await?.into_inner())
    }

    pub async fn token(&self, id: i64) -> Result<Option<Token>, CatalogError> {
        Ok(self.db.fetch_token(id).await?)
    }

    pub async fn token_by_symbol(&self, symbol: &str, network_id: i64) -> Result<Option<Token>, CatalogError> {
        Ok(self.db.fetch_token_by_symbol(symbol, network_id).await?)
    }

    /// Adds a currency. If it already exists, the stored record is returned unchanged; use [`Self::set_market_rate`]
    /// to update its rate.
    pub async fn add_fiat_currency(&self, currency: NewFiatCurrency) -> Result<FiatCurrency, CatalogError> {
        match self.db.insert_fiat_currency(currency).await? {
            InsertResult::Inserted(c) => {
                info!("📚️ Fiat currency {} added at a market rate of {}", c.code, c.market_rate);
                Ok(c)
            },
            InsertResult::AlreadyExists(c) => Ok(c),
        }
    }

    pub async fn fiat_currency(&self, code: &str) -> Result<Option<FiatCurrency>, CatalogError> {
        Ok(self.db.fetch_fiat_currency(code).await?)
    }

    pub async fn set_market_rate(&self, code: &str, rate: Amount) -> Result<FiatCurrency, CatalogError> {
        if !rate.is_positive() {
            return Err(CatalogError::InvalidRate(format!("Market rate for {code} must be positive")));
        }
        self.db.update_market_rate(code, rate).await?.ok_or_else(|| CatalogError::UnknownCurrency(code.to_string()))
    }

    pub async fn add_institution(&self, institution: NewInstitution) -> Result<Institution, CatalogError> {
        Ok(self.db.insert_institution(institution).await?.into_inner())
    }

    pub async fn institution(&self, code: &str) -> Result<Option<Institution>, CatalogError> {
        Ok(self.db.fetch_institution(code).await?)
    }

    /// Adds a provision bucket for a currency.
    ///
    /// Buckets may share a boundary amount with a neighbour (the boundary then belongs to the lower bucket), but must
    /// not otherwise overlap any existing bucket for the same currency.
    pub async fn add_provision_bucket(&self, bucket: NewProvisionBucket) -> Result<ProvisionBucket, CatalogError> {
        if bucket.min_amount.value() < 0 || bucket.min_amount > bucket.max_amount {
            return Err(CatalogError::InvalidBucket(format!(
                "[{}, {}] is not a valid range",
                bucket.min_amount, bucket.max_amount
            )));
        }
        let existing = self.db.fetch_provision_buckets(bucket.currency_id).await?;
        if let Some(clash) = existing.iter().find(|b| b.overlaps(bucket.min_amount, bucket.max_amount)) {
            return Err(CatalogError::OverlappingBucket {
                min: bucket.min_amount.to_string(),
                max: bucket.max_amount.to_string(),
                existing: clash.id,
            });
        }
        Ok(self.db.insert_provision_bucket(bucket).await?)
    }

    pub async fn provision_buckets(&self, currency_code: &str) -> Result<Vec<ProvisionBucket>, CatalogError> {
        let currency = self
            .db
            .fetch_fiat_currency(currency_code)
            .await?
            .ok_or_else(|| CatalogError::UnknownCurrency(currency_code.to_string()))?;
        Ok(self.db.fetch_provision_buckets(currency.id).await?)
    }

    /// Reports every gap of more than one whole currency unit between consecutive buckets. An empty result means the
    /// buckets tile the range from the lowest minimum to the highest maximum.
    pub async fn validate_bucket_tiling(&self, currency_code: &str) -> Result<Vec<TilingGap>, CatalogError> {
        let buckets = self.provision_buckets(currency_code).await?;
        let gaps = find_tiling_gaps(&buckets);
        for gap in &gaps {
            error!("📚️ {currency_code} buckets do not cover amounts between {} and {}", gap.after, gap.before);
        }
        Ok(gaps)
    }

    pub async fn register_provider(&self, provider: NewProviderProfile) -> Result<ProviderProfile, CatalogError> {
        let provider = self.db.insert_provider(provider).await?;
        info!("📚️ Provider #{} ({}) registered", provider.id, provider.trading_name);
        Ok(provider)
    }

    pub async fn provider(&self, id: i64) -> Result<Option<ProviderProfile>, CatalogError> {
        Ok(self.db.fetch_provider(id).await?)
    }

    /// Records a provider heartbeat, taking it online or offline.
    pub async fn set_provider_availability(&self, id: i64, is_available: bool) -> Result<ProviderProfile, CatalogError> {
        let provider = self
            .db
            .set_provider_availability(id, is_available, Utc::now())
            .await?
            .ok_or(CatalogError::ProviderNotFound(id))?;
        debug!("📚️ Provider #{id} is now {}", if is_available { "online" } else { "offline" });
        Ok(provider)
    }

    pub async fn add_provider_to_bucket(&self, provider_id: i64, bucket_id: i64) -> Result<(), CatalogError> {
        Ok(self.db.add_provider_to_bucket(provider_id, bucket_id).await?)
    }

    pub async fn remove_provider_from_bucket(&self, provider_id: i64, bucket_id: i64) -> Result<(), CatalogError> {
        Ok(self.db.remove_provider_from_bucket(provider_id, bucket_id).await?)
    }

    pub async fn set_provider_token(&self, settings: NewProviderOrderToken) -> Result<ProviderOrderToken, CatalogError> {
        if settings.min_order_amount > settings.max_order_amount {
            return Err(CatalogError::InvalidProviderSettings(format!(
                "Provider #{} order limits [{}, {}] are inverted",
                settings.provider_id, settings.min_order_amount, settings.max_order_amount
            )));
        }
        Ok(self.db.upsert_provider_order_token(settings).await?)
    }
}

/// `buckets` must be sorted by `min_amount`.
pub fn find_tiling_gaps(buckets: &[ProvisionBucket]) -> Vec<TilingGap> {
    buckets
        .windows(2)
        .filter(|pair| (pair[1].min_amount - pair[0].max_amount).value() > UNIT)
        .map(|pair| TilingGap { after: pair[0].max_amount, before: pair[1].min_amount })
        .collect()
}
