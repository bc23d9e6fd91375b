//! Server configuration.
//!
//! Everything is read from `AGG_*` environment variables (a `.env` file is loaded first, if present). Missing or
//! invalid values fall back to a default and the fallback is logged. The engine never reads the environment; the
//! option structs it needs are built from this configuration.
use std::{env, fmt::Display, str::FromStr, time::Duration as StdDuration};

use agg_common::{parse_boolean_flag, Secret};
use aggregator_engine::{
    agg_api::{AllocatorOptions, FulfillmentOptions, IndexerOptions, MatchingOptions, WebhookOptions},
    helpers::BackoffPolicy,
};
use chrono::Duration;
use log::*;

const DEFAULT_AGG_HOST: &str = "127.0.0.1";
const DEFAULT_AGG_PORT: u16 = 8370;
const DEFAULT_WEBHOOK_BASE_DELAY_SECS: u64 = 2;
const DEFAULT_WEBHOOK_MAX_DELAY_SECS: u64 = 3600;
const DEFAULT_WEBHOOK_MAX_ATTEMPTS: i64 = 10;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CANCELLATIONS: i64 = 3;
const DEFAULT_MAX_MATCH_SWEEPS: i64 = 10;
const DEFAULT_ORDER_FULFILLMENT_TIMEOUT_MINS: i64 = 10;
const DEFAULT_RECEIVE_ADDRESS_VALIDITY_MINS: i64 = 30;
const DEFAULT_MIN_CONFIRMATIONS: i64 = 1;
const DEFAULT_MATCHING_INTERVAL_SECS: u64 = 10;
const DEFAULT_WEBHOOK_RETRY_INTERVAL_SECS: u64 = 1;
const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Seed for deterministic deposit address derivation. Changing it changes every address that will be minted.
    pub address_seed: Secret<String>,
    /// Signs outbound webhooks and provider notifications
    pub webhook_secret: Secret<String>,
    /// Verifies the signature on provider callbacks
    pub provider_secret: Secret<String>,
    /// If false, provider callbacks are accepted without a signature check. **DANGER**
    pub provider_hmac_checks: bool,
    pub webhook: WebhookConfig,
    pub max_cancellations: i64,
    pub max_match_sweeps: i64,
    /// How long a provider may hold an order in `Processing` before it is reclaimed
    pub order_fulfillment_timeout: Duration,
    /// How long a leased receive address waits for funds
    pub receive_address_validity: Duration,
    pub min_confirmations: i64,
    /// The chain height to assume until the scanner reports a deposit
    pub chain_start_block: i64,
    pub intervals: WorkerIntervals,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
    pub max_attempts: i64,
    /// Per-request network timeout. A timed-out delivery counts as a failed attempt.
    pub timeout: StdDuration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_delay: StdDuration::from_secs(DEFAULT_WEBHOOK_BASE_DELAY_SECS),
            max_delay: StdDuration::from_secs(DEFAULT_WEBHOOK_MAX_DELAY_SECS),
            max_attempts: DEFAULT_WEBHOOK_MAX_ATTEMPTS,
            timeout: StdDuration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        }
    }
}

/// How often each background worker wakes up.
#[derive(Clone, Copy, Debug)]
pub struct WorkerIntervals {
    pub matching: StdDuration,
    pub webhook_retry: StdDuration,
    /// Address expiry and the stale-order sweeper
    pub housekeeping: StdDuration,
}

impl Default for WorkerIntervals {
    fn default() -> Self {
        Self {
            matching: StdDuration::from_secs(DEFAULT_MATCHING_INTERVAL_SECS),
            webhook_retry: StdDuration::from_secs(DEFAULT_WEBHOOK_RETRY_INTERVAL_SECS),
            housekeeping: StdDuration::from_secs(DEFAULT_HOUSEKEEPING_INTERVAL_SECS),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_AGG_HOST.to_string(),
            port: DEFAULT_AGG_PORT,
            database_url: String::default(),
            address_seed: Secret::default(),
            webhook_secret: Secret::default(),
            provider_secret: Secret::default(),
            provider_hmac_checks: true,
            webhook: WebhookConfig::default(),
            max_cancellations: DEFAULT_MAX_CANCELLATIONS,
            max_match_sweeps: DEFAULT_MAX_MATCH_SWEEPS,
            order_fulfillment_timeout: Duration::minutes(DEFAULT_ORDER_FULFILLMENT_TIMEOUT_MINS),
            receive_address_validity: Duration::minutes(DEFAULT_RECEIVE_ADDRESS_VALIDITY_MINS),
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            chain_start_block: 0,
            intervals: WorkerIntervals::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("AGG_HOST").ok().unwrap_or_else(|| DEFAULT_AGG_HOST.into());
        let port = env_or_default("AGG_PORT", DEFAULT_AGG_PORT);
        let database_url = env::var("AGG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ AGG_DATABASE_URL is not set. Please set it to the URL for the aggregator database.");
            String::default()
        });
        let address_seed = required_secret("AGG_ADDRESS_SEED", "the seed used to derive deposit addresses");
        let webhook_secret = required_secret("AGG_WEBHOOK_SECRET", "the key used to sign outbound webhooks");
        let provider_secret =
            required_secret("AGG_PROVIDER_SECRET", "the key providers use to sign their callbacks");
        let provider_hmac_checks = parse_boolean_flag(env::var("AGG_PROVIDER_HMAC_CHECKS").ok(), true);
        if !provider_hmac_checks {
            warn!("🚨️ Provider callback signature checks are DISABLED. Do not run production like this. 🚨️");
        }
        let webhook = WebhookConfig {
            base_delay: StdDuration::from_secs(env_or_default(
                "AGG_WEBHOOK_BASE_DELAY_SECS",
                DEFAULT_WEBHOOK_BASE_DELAY_SECS,
            )),
            max_delay: StdDuration::from_secs(env_or_default(
                "AGG_WEBHOOK_MAX_DELAY_SECS",
                DEFAULT_WEBHOOK_MAX_DELAY_SECS,
            )),
            max_attempts: env_or_default("AGG_WEBHOOK_MAX_ATTEMPTS", DEFAULT_WEBHOOK_MAX_ATTEMPTS),
            timeout: StdDuration::from_secs(env_or_default("AGG_WEBHOOK_TIMEOUT_SECS", DEFAULT_WEBHOOK_TIMEOUT_SECS)),
        };
        let intervals = WorkerIntervals {
            matching: StdDuration::from_secs(env_or_default(
                "AGG_MATCHING_INTERVAL_SECS",
                DEFAULT_MATCHING_INTERVAL_SECS,
            )),
            webhook_retry: StdDuration::from_secs(env_or_default(
                "AGG_WEBHOOK_RETRY_INTERVAL_SECS",
                DEFAULT_WEBHOOK_RETRY_INTERVAL_SECS,
            )),
            housekeeping: StdDuration::from_secs(env_or_default(
                "AGG_HOUSEKEEPING_INTERVAL_SECS",
                DEFAULT_HOUSEKEEPING_INTERVAL_SECS,
            )),
        };
        let order_fulfillment_timeout = Duration::minutes(env_or_default(
            "AGG_ORDER_FULFILLMENT_TIMEOUT_MINS",
            DEFAULT_ORDER_FULFILLMENT_TIMEOUT_MINS,
        ));
        let receive_address_validity = Duration::minutes(env_or_default(
            "AGG_RECEIVE_ADDRESS_VALIDITY_MINS",
            DEFAULT_RECEIVE_ADDRESS_VALIDITY_MINS,
        ));
        Self {
            host,
            port,
            database_url,
            address_seed,
            webhook_secret,
            provider_secret,
            provider_hmac_checks,
            webhook,
            max_cancellations: env_or_default("AGG_MAX_CANCELLATIONS", DEFAULT_MAX_CANCELLATIONS),
            max_match_sweeps: env_or_default("AGG_MAX_MATCH_SWEEPS", DEFAULT_MAX_MATCH_SWEEPS),
            order_fulfillment_timeout,
            receive_address_validity,
            min_confirmations: env_or_default("AGG_MIN_CONFIRMATIONS", DEFAULT_MIN_CONFIRMATIONS),
            chain_start_block: env_or_default("AGG_CHAIN_START_BLOCK", 0),
            intervals,
        }
    }

    pub fn allocator_options(&self) -> AllocatorOptions {
        AllocatorOptions { validity: self.receive_address_validity, ..Default::default() }
    }

    pub fn indexer_options(&self) -> IndexerOptions {
        IndexerOptions { min_confirmations: self.min_confirmations }
    }

    pub fn matching_options(&self) -> MatchingOptions {
        MatchingOptions { max_sweeps: self.max_match_sweeps, ..Default::default() }
    }

    pub fn fulfillment_options(&self) -> FulfillmentOptions {
        FulfillmentOptions {
            max_cancellations: self.max_cancellations,
            order_timeout: self.order_fulfillment_timeout,
            ..Default::default()
        }
    }

    pub fn webhook_options(&self) -> WebhookOptions {
        let backoff = BackoffPolicy {
            base_delay: self.webhook.base_delay,
            max_delay: self.webhook.max_delay,
            max_attempts: self.webhook.max_attempts,
            ..Default::default()
        };
        // A claimed attempt must not be picked up by another worker while its delivery is still in flight
        let lease = Duration::seconds(2 * self.webhook.timeout.as_secs() as i64).max(Duration::seconds(60));
        WebhookOptions { backoff, claim_lease: lease, ..Default::default() }
    }
}

/// Reads and parses `name`, logging and returning `default` if it is missing or invalid.
fn env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    env::var(name)
        .map_err(|_| info!("🪛️ {name} is not set. Using the default value of {default}."))
        .and_then(|s| {
            s.trim().parse::<T>().map_err(|e| {
                warn!("🪛️ Invalid configuration value for {name} ({s}). {e} Using the default value of {default}.")
            })
        })
        .ok()
        .unwrap_or(default)
}

fn required_secret(name: &str, purpose: &str) -> Secret<String> {
    let value = env::var(name).ok().unwrap_or_else(|| {
        error!("🪛️ {name} is not set. Please set it to {purpose}.");
        String::default()
    });
    Secret::new(value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fallbacks_for_missing_and_invalid_values() {
        env::remove_var("AGG_TEST_MISSING");
        assert_eq!(env_or_default("AGG_TEST_MISSING", 42u64), 42);
        env::set_var("AGG_TEST_INVALID", "forty-two");
        assert_eq!(env_or_default("AGG_TEST_INVALID", 42i64), 42);
        env::set_var("AGG_TEST_VALID", " 7 ");
        assert_eq!(env_or_default("AGG_TEST_VALID", 42u16), 7);
    }

    #[test]
    fn engine_options_follow_the_configuration() {
        let mut config = ServerConfig::new("0.0.0.0", 9000);
        config.max_cancellations = 5;
        config.max_match_sweeps = 4;
        config.min_confirmations = 12;
        config.webhook.max_attempts = 6;
        config.webhook.timeout = StdDuration::from_secs(45);
        assert_eq!(config.fulfillment_options().max_cancellations, 5);
        assert_eq!(config.fulfillment_options().order_timeout, Duration::minutes(10));
        assert_eq!(config.matching_options().max_sweeps, 4);
        assert_eq!(config.indexer_options().min_confirmations, 12);
        assert_eq!(config.allocator_options().validity, Duration::minutes(30));
        let webhooks = config.webhook_options();
        assert_eq!(webhooks.backoff.max_attempts, 6);
        assert_eq!(webhooks.backoff.base_delay, StdDuration::from_secs(2));
        assert_eq!(webhooks.claim_lease, Duration::seconds(90));
    }
}
