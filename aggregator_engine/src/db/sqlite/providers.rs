use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewProviderOrderToken, NewProviderProfile, ProviderCandidate, ProviderOrderToken, ProviderProfile},
    traits::StorageError,
};

pub async fn insert_provider(
    provider: NewProviderProfile,
    conn: &mut SqliteConnection,
) -> Result<ProviderProfile, StorageError> {
    let now = Utc::now();
    let provider = sqlx::query_as::<_, ProviderProfile>(
        r#"
        INSERT INTO provider_profiles (
            trading_name,
            currency_id,
            provision_mode,
            is_partner,
            is_available,
            callback_url,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, FALSE, $5, $6, $6)
        RETURNING *
        "#,
    )
    .bind(provider.trading_name)
    .bind(provider.currency_id)
    .bind(provider.provision_mode)
    .bind(provider.is_partner)
    .bind(provider.callback_url)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(|e| StorageError::InsertError(e.to_string()))?;
    debug!("🗃️ Provider #{} ({}) registered", provider.id, provider.trading_name);
    Ok(provider)
}

pub async fn fetch_provider(id: i64, conn: &mut SqliteConnection) -> Result<Option<ProviderProfile>, StorageError> {
    let provider =
        sqlx::query_as("SELECT * FROM provider_profiles WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(provider)
}

pub async fn set_availability(
    id: i64,
    is_available: bool,
    seen_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<ProviderProfile>, StorageError> {
    let provider = sqlx::query_as::<_, ProviderProfile>(
        r#"UPDATE provider_profiles SET is_available = $1, last_seen_at = $2, updated_at = $3
        WHERE id = $4 RETURNING *"#,
    )
    .bind(is_available)
    .bind(seen_at)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("🗃️ Provider #{id} availability set to {is_available}");
    Ok(provider)
}

pub(crate) async fn stamp_last_assigned(
    id: i64,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StorageError> {
    let result = sqlx::query("UPDATE provider_profiles SET last_assigned_at = $1, updated_at = $1 WHERE id = $2")
        .bind(at)
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::not_found("provider", id));
    }
    Ok(())
}

pub async fn add_to_bucket(provider_id: i64, bucket_id: i64, conn: &mut SqliteConnection) -> Result<(), StorageError> {
    sqlx::query("INSERT OR IGNORE INTO provision_bucket_providers (bucket_id, provider_id) VALUES ($1, $2)")
        .bind(bucket_id)
        .bind(provider_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn remove_from_bucket(
    provider_id: i64,
    bucket_id: i64,
    conn: &mut SqliteConnection,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM provision_bucket_providers WHERE bucket_id = $1 AND provider_id = $2")
        .bind(bucket_id)
        .bind(provider_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn upsert_order_token(
    settings: NewProviderOrderToken,
    conn: &mut SqliteConnection,
) -> Result<ProviderOrderToken, StorageError> {
    let token = sqlx::query_as::<_, ProviderOrderToken>(
        r#"
        INSERT INTO provider_order_tokens (
            provider_id,
            token_id,
            min_order_amount,
            max_order_amount,
            conversion_rate_type,
            fixed_conversion_rate,
            floating_conversion_rate,
            rate_slippage_bps,
            address,
            network
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (provider_id, token_id) DO UPDATE SET
            min_order_amount = excluded.min_order_amount,
            max_order_amount = excluded.max_order_amount,
            conversion_rate_type = excluded.conversion_rate_type,
            fixed_conversion_rate = excluded.fixed_conversion_rate,
            floating_conversion_rate = excluded.floating_conversion_rate,
            rate_slippage_bps = excluded.rate_slippage_bps,
            address = excluded.address,
            network = excluded.network
        RETURNING *
        "#,
    )
    .bind(settings.provider_id)
    .bind(settings.token_id)
    .bind(settings.min_order_amount)
    .bind(settings.max_order_amount)
    .bind(settings.conversion_rate_type)
    .bind(settings.fixed_conversion_rate)
    .bind(settings.floating_conversion_rate)
    .bind(settings.rate_slippage_bps)
    .bind(settings.address)
    .bind(settings.network)
    .fetch_one(conn)
    .await?;
    Ok(token)
}

pub async fn fetch_bucket_candidates(
    bucket_id: i64,
    token_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<ProviderCandidate>, StorageError> {
    let providers: Vec<ProviderProfile> = sqlx::query_as(
        r#"
        SELECT provider_profiles.* FROM provider_profiles
        JOIN provision_bucket_providers ON provision_bucket_providers.provider_id = provider_profiles.id
        WHERE provision_bucket_providers.bucket_id = $1
        ORDER BY provider_profiles.created_at ASC, provider_profiles.id ASC
        "#,
    )
    .bind(bucket_id)
    .fetch_all(&mut *conn)
    .await?;
    let tokens: Vec<ProviderOrderToken> = sqlx::query_as(
        r#"
        SELECT provider_order_tokens.* FROM provider_order_tokens
        JOIN provision_bucket_providers ON provision_bucket_providers.provider_id = provider_order_tokens.provider_id
        WHERE provision_bucket_providers.bucket_id = $1 AND provider_order_tokens.token_id = $2
        "#,
    )
    .bind(bucket_id)
    .bind(token_id)
    .fetch_all(conn)
    .await?;
    let mut tokens = tokens.into_iter().map(|t| (t.provider_id, t)).collect::<HashMap<_, _>>();
    let candidates = providers
        .into_iter()
        .filter_map(|provider| tokens.remove(&provider.id).map(|token| ProviderCandidate { provider, token }))
        .collect::<Vec<_>>();
    trace!("🗃️ Bucket #{bucket_id} has {} candidates for token #{token_id}", candidates.len());
    Ok(candidates)
}
