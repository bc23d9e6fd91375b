//! # Aggregator server
//! This crate hosts the server for the off-ramp aggregator. It is responsible for:
//! * Accepting payment orders from merchants and handing out deposit addresses.
//! * Receiving confirmed transfers from the chain scanner.
//! * Receiving fulfillment reports, validation verdicts and cancellations from liquidity providers.
//! * Running the background workers: matching sweeps, webhook retries, address expiry and the stale-order sweeper.
//! * Notifying providers of assignments and merchants of order progress via signed webhooks.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `GET /health`: A health check route that returns a 200 OK response.
//! * `POST /v1/orders`: Create a payment order and lease a deposit address to it.
//! * `GET /v1/payment_orders/{id}`: Fetch a payment order and its deposit address.
//! * `POST /v1/deposits`: Chain scanner intake.
//! * `GET /v1/orders/{id}`: Fetch a lock order and its cancellation history.
//! * `POST /v1/orders/{id}/refund`, `POST /v1/orders/{id}/refund/confirm`: Record and confirm refunds.
//! * `POST /v1/provider/orders/{id}/fulfill`, `.../validate`, `.../cancel`: Provider callbacks (HMAC signed).
//! * `GET /v1/review/orders`: Lock orders flagged for manual review.
//! * `GET /v1/webhooks/exhausted`: Webhooks that could not be delivered.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
