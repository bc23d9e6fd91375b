//! Background workers.
//!
//! Each worker is a `tokio` task that wakes up on a fixed interval and runs one pass of an engine job. Workers share
//! nothing but the database, and every job is safe to run concurrently with itself, so running several server
//! instances side by side is fine. Do not await the returned `JoinHandle`s; the workers run indefinitely.
use std::{sync::Arc, time::Duration};

use aggregator_engine::{
    agg_api::{AddressAllocatorApi, FulfillmentApi, MatchingApi},
    helpers::SeededAddressDeriver,
    SqliteDatabase,
};
use chrono::Utc;
use log::*;
use tokio::task::JoinHandle;

use crate::integrations::{notifications::Webhooks, ScannerChainHead};

pub type Allocator = AddressAllocatorApi<SqliteDatabase, ScannerChainHead, SeededAddressDeriver>;

/// Offers every unassigned lock order to the providers in its bucket.
pub fn start_matching_worker(api: Arc<MatchingApi<SqliteDatabase>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🤝️ Matching worker started. Sweeping every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            trace!("🤝️ Running matching sweep");
            match api.sweep().await {
                Ok(report) if report.assigned + report.unmatched > 0 => info!(
                    "🤝️ Matching sweep: {} assigned, {} unmatched, {} flagged for review, {} lost to other matchers",
                    report.assigned, report.unmatched, report.flagged, report.conflicts
                ),
                Ok(_) => trace!("🤝️ Nothing to match"),
                Err(e) => error!("🤝️ Error running matching sweep: {e}"),
            }
        }
    })
}

/// Redelivers webhooks whose retry time has come.
pub fn start_webhook_retry_worker(api: Arc<Webhooks>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("📨️ Webhook retry worker started");
        loop {
            timer.tick().await;
            match api.process_due_attempts(Utc::now()).await {
                Ok(report) => {
                    let total = report.delivered + report.rescheduled + report.exhausted + report.failed;
                    if total > 0 {
                        info!(
                            "📨️ Webhook retries: {} delivered, {} rescheduled, {} exhausted, {} failed",
                            report.delivered, report.rescheduled, report.exhausted, report.failed
                        );
                    }
                },
                Err(e) => error!("📨️ Error processing webhook retries: {e}"),
            }
        }
    })
}

/// Expires unfunded payment orders and takes stale orders back from unresponsive providers.
pub fn start_housekeeping_worker(
    allocator: Arc<Allocator>,
    fulfillment: Arc<FulfillmentApi<SqliteDatabase>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Housekeeping worker started");
        loop {
            timer.tick().await;
            let now = Utc::now();
            debug!("🕰️ Running order expiry job");
            match allocator.expire_unfunded_orders(now).await {
                Ok(expired) if !expired.is_empty() => {
                    info!("🕰️ {} unfunded payment orders expired", expired.len());
                    debug!("🕰️ Expired orders: {}", order_list(expired.iter().map(|o| o.id)));
                },
                Ok(_) => {},
                Err(e) => error!("🕰️ Error running order expiry job: {e}"),
            }
            debug!("🕰️ Running stale order sweep");
            match fulfillment.reclaim_stale_orders(now).await {
                Ok(report) if report.reclaimed + report.cancelled > 0 => info!(
                    "🕰️ Reclaimed {} stale orders, {} of which must now be refunded",
                    report.reclaimed + report.cancelled,
                    report.cancelled
                ),
                Ok(_) => {},
                Err(e) => error!("🕰️ Error running stale order sweep: {e}"),
            }
        }
    })
}

fn order_list<I: Iterator<Item = i64>>(ids: I) -> String {
    ids.map(|id| format!("#{id}")).collect::<Vec<String>>().join(", ")
}
