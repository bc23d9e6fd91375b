//! # Aggregator component APIs
//!
//! Each API wraps a storage backend (anything implementing the relevant traits from [`crate::traits`]) and exposes
//! one component of the aggregator:
//!
//! * [`CatalogApi`] maintains the reference catalog and provider configuration.
//! * [`AddressAllocatorApi`] creates payment orders and leases deposit addresses to them.
//! * [`ChainIndexerApi`] turns confirmed on-chain transfers into lock orders.
//! * [`MatchingApi`] assigns lock orders to liquidity providers through provision buckets.
//! * [`FulfillmentApi`] drives assigned orders to validation, back into the matching pool, or to a refund.
//! * [`WebhookApi`] delivers signed notifications to merchants and retries failed deliveries.
//!
//! APIs hold no global state. Interesting state changes are published through [`crate::events::EventProducers`].
pub mod address_api;
pub mod catalog_api;
pub mod errors;
pub mod fulfillment_api;
pub mod indexer_api;
pub mod matching_api;
pub mod webhook_api;

pub use address_api::{AddressAllocatorApi, AllocatorOptions};
pub use catalog_api::{find_tiling_gaps, CatalogApi, TilingGap};
pub use errors::{AllocatorError, CatalogError, FulfillmentError, IndexerError, MatchingError, WebhookError};
pub use fulfillment_api::{FulfillmentApi, FulfillmentOptions, ReclaimReport, ValidationOutcome};
pub use indexer_api::{ChainIndexerApi, Deposit, DepositOutcome, IndexerOptions};
pub use matching_api::{
    rank_candidates,
    select_bucket,
    MatchOutcome,
    MatchingApi,
    MatchingOptions,
    SweepReport,
    UnmatchedReason,
};
pub use webhook_api::{EnqueueOutcome, RetryReport, WebhookApi, WebhookEnvelope, WebhookOptions};
