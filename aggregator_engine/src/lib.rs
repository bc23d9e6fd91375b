//! Aggregator Engine
//!
//! The engine is the core of a crypto-to-fiat off-ramp aggregator. Merchants create payment orders, customers fund
//! them on-chain, and liquidity providers pay out the fiat equivalent. This library contains that logic and nothing
//! else: it never talks to a chain node, a provider or a merchant directly.
//!
//! The library is divided into three main sections:
//! 1. Storage ([`mod@traits`] and [`mod@db`]). The APIs depend only on the storage traits. SQLite is the supported
//!    backend. The data types used by the storage layer are defined in [`mod@db_types`] and are public.
//! 2. The component APIs ([`mod@agg_api`]): address allocation, deposit bookkeeping, provider matching, fulfillment
//!    and webhook delivery.
//! 3. Events ([`mod@events`]). The APIs publish an event whenever something the outside world cares about happens,
//!    e.g. a provider was assigned an order. The server hooks into these to notify providers and merchants.
pub mod agg_api;
pub mod db;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod traits;

#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use agg_api::{
    AddressAllocatorApi,
    CatalogApi,
    ChainIndexerApi,
    FulfillmentApi,
    MatchingApi,
    WebhookApi,
};
