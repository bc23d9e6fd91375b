use agg_common::Amount;
use chrono::Utc;
use log::{debug, trace};
use sqlx::SqliteConnection;

use super::is_unique_violation;
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

pub async fn idempotent_insert_network(
    network: NewNetwork,
    conn: &mut SqliteConnection,
) -> Result<InsertResult<Network>, StorageError> {
    let result = sqlx::query_as::<_, Network>(
        r#"INSERT INTO networks (identifier, chain_id, block_time_secs, is_testnet)
        VALUES ($1, $2, $3, $4) RETURNING *"#,
    )
    .bind(&network.identifier)
    .bind(network.chain_id)
    .bind(network.block_time_secs)
    .bind(network.is_testnet)
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(n) => {
            debug!("🗃️ Network {} has been added to the catalog", n.identifier);
            Ok(InsertResult::Inserted(n))
        },
        Err(e) if is_unique_violation(&e) => fetch_network(&network.identifier, conn)
            .await?
            .map(InsertResult::AlreadyExists)
            .ok_or_else(|| StorageError::not_found("network", &network.identifier)),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_network(identifier: &str, conn: &mut SqliteConnection) -> Result<Option<Network>, StorageError> {
    let network = sqlx::query_as("SELECT * FROM networks WHERE identifier = $1")
        .bind(identifier)
        .fetch_optional(conn)
        .await?;
    Ok(network)
}

pub async fn idempotent_insert_token(
    token: NewToken,
    conn: &mut SqliteConnection,
) -> Result<InsertResult<Token>, StorageError> {
    let result = sqlx::query_as::<_, Token>(
        r#"INSERT INTO tokens (symbol, contract_address, decimals, network_id)
        VALUES ($1, $2, $3, $4) RETURNING *"#,
    )
    .bind(&token.symbol)
    .bind(&token.contract_address)
    .bind(token.decimals)
    .bind(token.network_id)
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(t) => {
            debug!("🗃️ Token {} on network #{} has been added to the catalog", t.symbol, t.network_id);
            Ok(InsertResult::Inserted(t))
        },
        Err(e) if is_unique_violation(&e) => fetch_token_by_symbol(&token.symbol, token.network_id, conn)
            .await?
            .map(InsertResult::AlreadyExists)
            .ok_or_else(|| StorageError::not_found("token", &token.symbol)),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_token(id: i64, conn: &mut SqliteConnection) -> Result<Option<Token>, StorageError> {
    let token = sqlx::query_as("SELECT * FROM tokens WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(token)
}

pub async fn fetch_token_by_symbol(
    symbol: &str,
    network_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Token>, StorageError> {
    let token = sqlx::query_as("SELECT * FROM tokens WHERE symbol = $1 AND network_id = $2")
        .bind(symbol)
        .bind(network_id)
        .fetch_optional(conn)
        .await?;
    Ok(token)
}

pub async fn idempotent_insert_fiat_currency(
    currency: NewFiatCurrency,
    conn: &mut SqliteConnection,
) -> Result<InsertResult<FiatCurrency>, StorageError> {
    let result = sqlx::query_as::<_, FiatCurrency>(
        r#"INSERT INTO fiat_currencies (code, name, symbol, market_rate, updated_at)
        VALUES ($1, $2, $3, $4, $5) RETURNING *"#,
    )
    .bind(&currency.code)
    .bind(&currency.name)
    .bind(&currency.symbol)
    .bind(currency.market_rate)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(c) => {
            debug!("🗃️ Fiat currency {} has been added to the catalog at {}", c.code, c.market_rate);
            Ok(InsertResult::Inserted(c))
        },
        Err(e) if is_unique_violation(&e) => fetch_fiat_currency(&currency.code, conn)
            .await?
            .map(InsertResult::AlreadyExists)
            .ok_or_else(|| StorageError::not_found("fiat currency", &currency.code)),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_fiat_currency(code: &str, conn: &mut SqliteConnection) -> Result<Option<FiatCurrency>, StorageError> {
    let currency =
        sqlx::query_as("SELECT * FROM fiat_currencies WHERE code = $1").bind(code).fetch_optional(conn).await?;
    Ok(currency)
}

pub async fn update_market_rate(
    code: &str,
    rate: Amount,
    conn: &mut SqliteConnection,
) -> Result<Option<FiatCurrency>, StorageError> {
    let currency = sqlx::query_as::<_, FiatCurrency>(
        "UPDATE fiat_currencies SET market_rate = $1, updated_at = $2 WHERE code = $3 RETURNING *",
    )
    .bind(rate)
    .bind(Utc::now())
    .bind(code)
    .fetch_optional(conn)
    .await?;
    trace!("🗃️ Market rate for {code} set to {rate}");
    Ok(currency)
}

pub async fn idempotent_insert_institution(
    institution: NewInstitution,
    conn: &mut SqliteConnection,
) -> Result<InsertResult<Institution>, StorageError> {
    let result = sqlx::query_as::<_, Institution>(
        r#"INSERT INTO institutions (code, name, institution_type, currency_id)
        VALUES ($1, $2, $3, $4) RETURNING *"#,
    )
    .bind(&institution.code)
    .bind(&institution.name)
    .bind(institution.institution_type)
    .bind(institution.currency_id)
    .fetch_one(&mut *conn)
    .await;
    match result {
        Ok(i) => Ok(InsertResult::Inserted(i)),
        Err(e) if is_unique_violation(&e) => fetch_institution(&institution.code, conn)
            .await?
            .map(InsertResult::AlreadyExists)
            .ok_or_else(|| StorageError::not_found("institution", &institution.code)),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_institution(code: &str, conn: &mut SqliteConnection) -> Result<Option<Institution>, StorageError> {
    let institution =
        sqlx::query_as("SELECT * FROM institutions WHERE code = $1").bind(code).fetch_optional(conn).await?;
    Ok(institution)
}

pub async fn insert_provision_bucket(
    bucket: NewProvisionBucket,
    conn: &mut SqliteConnection,
) -> Result<ProvisionBucket, StorageError> {
    let bucket = sqlx::query_as::<_, ProvisionBucket>(
        r#"INSERT INTO provision_buckets (currency_id, min_amount, max_amount, created_at)
        VALUES ($1, $2, $3, $4) RETURNING *"#,
    )
    .bind(bucket.currency_id)
    .bind(bucket.min_amount)
    .bind(bucket.max_amount)
    .bind(Utc::now())
    .fetch_one(conn)
    .await
    .map_err(|e| StorageError::InsertError(e.to_string()))?;
    debug!(
        "🗃️ Provision bucket #{} [{}, {}] created for currency #{}",
        bucket.id, bucket.min_amount, bucket.max_amount, bucket.currency_id
    );
    Ok(bucket)
}

pub async fn fetch_provision_bucket(id: i64, conn: &mut SqliteConnection) -> Result<Option<ProvisionBucket>, StorageError> {
    let bucket =
        sqlx::query_as("SELECT * FROM provision_buckets WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(bucket)
}

pub async fn fetch_provision_buckets(
    currency_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<ProvisionBucket>, StorageError> {
    let buckets = sqlx::query_as("SELECT * FROM provision_buckets WHERE currency_id = $1 ORDER BY min_amount ASC, id ASC")
        .bind(currency_id)
        .fetch_all(conn)
        .await?;
    Ok(buckets)
}
