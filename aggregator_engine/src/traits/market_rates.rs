use agg_common::Amount;

use crate::traits::StorageError;

/// Source of the current market rate for a fiat currency, quoted per unit of token.
#[allow(async_fn_in_trait)]
pub trait MarketRates {
    /// Returns `None` if there is no rate for `currency`.
    async fn market_rate(&self, currency: &str) -> Result<Option<Amount>, StorageError>;
}
