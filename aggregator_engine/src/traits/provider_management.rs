use chrono::{DateTime, Utc};

use crate::{
    db_types::{
        NewProviderOrderToken,
        NewProviderProfile,
        ProviderCandidate,
        ProviderOrderToken,
        ProviderProfile,
    },
    traits::StorageError,
};

#[allow(async_fn_in_trait)]
pub trait ProviderManagement {
    /// Stores a new provider. Providers start offline.
    async fn insert_provider(&self, provider: NewProviderProfile) -> Result<ProviderProfile, StorageError>;

    async fn fetch_provider(&self, id: i64) -> Result<Option<ProviderProfile>, StorageError>;

    /// Sets the provider online or offline and records `seen_at` as its last heartbeat.
    async fn set_provider_availability(
        &self,
        id: i64,
        is_available: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<Option<ProviderProfile>, StorageError>;

    /// Adds the provider to the bucket. Adding an existing member is a no-op.
    async fn add_provider_to_bucket(&self, provider_id: i64, bucket_id: i64) -> Result<(), StorageError>;

    async fn remove_provider_from_bucket(&self, provider_id: i64, bucket_id: i64) -> Result<(), StorageError>;

    /// Creates or replaces the provider's settings for a token.
    async fn upsert_provider_order_token(
        &self,
        settings: NewProviderOrderToken,
    ) -> Result<ProviderOrderToken, StorageError>;

    /// Every member of the bucket that has settings for `token_id`, whatever its availability, ordered by provider
    /// creation.
    async fn fetch_bucket_candidates(
        &self,
        bucket_id: i64,
        token_id: i64,
    ) -> Result<Vec<ProviderCandidate>, StorageError>;
}
