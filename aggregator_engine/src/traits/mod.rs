//! # Storage and collaborator interfaces
//!
//! This module defines the contracts the aggregator APIs rely on. Storage backends implement the `*Management`
//! traits; everything the core needs from durable state is expressed here as point lookups, range queries by status or
//! time, and guarded (compare-and-swap) updates. No API holds a lock across a network call. Instead, every state
//! change is an `UPDATE ... WHERE status = <expected>` and the caller inspects whether it won.
//!
//! * [`CatalogManagement`] holds the reference catalog: networks, tokens, fiat currencies, institutions and
//!   provision buckets.
//! * [`PaymentOrderManagement`] stores merchant payment orders.
//! * [`AddressManagement`] leases deposit addresses to payment orders.
//! * [`LockOrderManagement`] records deposits as lock orders and drives their status transitions.
//! * [`ProviderManagement`] stores liquidity providers, their bucket membership and per-token settings.
//! * [`WebhookManagement`] schedules webhook retries.
//! * [`AggregatorDatabase`] ties all of the above together for a single backend.
//!
//! The remaining traits are seams to external collaborators: [`MarketRates`], [`ChainHead`], [`AddressDeriver`] and
//! [`WebhookTransport`].
mod address_management;
mod aggregator_database;
mod catalog_management;
mod chain;
mod data_objects;
mod lock_order_management;
mod market_rates;
mod payment_order_management;
mod provider_management;
mod storage_error;
mod webhook_management;
mod webhook_transport;

pub use address_management::AddressManagement;
pub use aggregator_database::AggregatorDatabase;
pub use catalog_management::CatalogManagement;
pub use chain::{AddressDeriver, ChainHead};
pub use data_objects::{Cancellation, InsertResult, WebhookFailure};
pub use lock_order_management::LockOrderManagement;
pub use market_rates::MarketRates;
pub use payment_order_management::PaymentOrderManagement;
pub use provider_management::ProviderManagement;
pub use storage_error::StorageError;
pub use webhook_management::WebhookManagement;
pub use webhook_transport::{DeliveryError, WebhookRequest, WebhookTransport};
