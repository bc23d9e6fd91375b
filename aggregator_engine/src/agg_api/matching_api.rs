//! # Bucket matching
//!
//! A `Pending` lock order is matched in three steps:
//!
//! 1. **Bucket.** The order's fiat value (`amount × rate`) selects a provision bucket for its currency. Buckets are
//!    ordered by `min_amount`. A value on the boundary shared by two buckets belongs to the lower one, and a value in a
//!    sub-unit gap between two buckets goes to the upper one. Values below the first bucket or above the last have no
//!    bucket, which is a configuration gap.
//! 2. **Eligibility.** A bucket member is eligible if it is online, has settings for the order's token whose limits
//!    bracket the token amount, and quotes a rate within its slippage tolerance of the order's rate.
//! 3. **Fairness.** Among eligible providers, the one assigned least recently wins. Providers never assigned come
//!    first. Ties are broken by provider creation order.
//!
//! The assignment itself is a compare-and-swap from `Pending` to `Processing`. When two matchers race on one order,
//! exactly one succeeds; the other sees [`MatchOutcome::AlreadyTaken`] and walks away.
use std::{cmp::Ordering, fmt::Debug};

use agg_common::Amount;
use log::*;

use crate::{
    agg_api::errors::MatchingError,
    db_types::{LockOrderStatus, LockPaymentOrder, ProviderCandidate, ProviderProfile, ProvisionBucket},
    events::{EventProducers, ProviderAssignedEvent},
    traits::{CatalogManagement, LockOrderManagement, MarketRates, ProviderManagement},
};

#[derive(Debug, Clone)]
pub struct MatchingOptions {
    /// Unsuccessful matching passes before an order is flagged for manual review
    pub max_sweeps: i64,
    /// Orders considered per sweep
    pub batch_size: i64,
}

impl Default for MatchingOptions {
    fn default() -> Self {
        Self { max_sweeps: 10, batch_size: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmatchedReason {
    /// No bucket covers the order's value
    NoBucket,
    /// The bucket has no eligible provider right now
    NoEligibleProvider { bucket_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Assigned { order: LockPaymentOrder, provider: ProviderProfile, bucket: ProvisionBucket },
    /// The order stays `Pending` for a later pass, unless it was just flagged for manual review
    Unmatched { reason: UnmatchedReason, flagged_for_review: bool },
    /// The order is not `Pending` (any more). Nothing was changed.
    AlreadyTaken { status: LockOrderStatus },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub assigned: usize,
    pub unmatched: usize,
    pub flagged: usize,
    pub conflicts: usize,
}

/// Picks the bucket for `value`. `buckets` must be sorted by `min_amount` and must not overlap.
pub fn select_bucket(buckets: &[ProvisionBucket], value: Amount) -> Option<&ProvisionBucket> {
    let first = buckets.first()?;
    if value < first.min_amount {
        return None;
    }
    buckets.iter().find(|b| value <= b.max_amount)
}

/// Filters `candidates` down to eligible providers and sorts them, best first.
pub fn rank_candidates(
    candidates: Vec<ProviderCandidate>,
    amount: Amount,
    order_rate: Amount,
    market_rate: Amount,
) -> Vec<ProviderCandidate> {
    let mut eligible = candidates
        .into_iter()
        .filter(|c| c.provider.is_available)
        .filter(|c| c.token.accepts_amount(amount))
        .filter(|c| c.token.rate_within_slippage(order_rate, market_rate))
        .collect::<Vec<_>>();
    eligible.sort_by(|a, b| fairness_order(&a.provider, &b.provider));
    eligible
}

fn fairness_order(a: &ProviderProfile, b: &ProviderProfile) -> Ordering {
    // None sorts before Some, so providers that have never been assigned go first
    a.last_assigned_at
        .cmp(&b.last_assigned_at)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// `MatchingApi` assigns `Pending` lock orders to liquidity providers.
pub struct MatchingApi<B> {
    db: B,
    options: MatchingOptions,
    producers: EventProducers,
}

impl<B> Debug for MatchingApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MatchingApi ({:?})", self.options)
    }
}

impl<B> MatchingApi<B> {
    pub fn new(db: B, options: MatchingOptions, producers: EventProducers) -> Self {
        Self { db, options, producers }
    }
}

impl<B> MatchingApi<B>
where B: LockOrderManagement + ProviderManagement + CatalogManagement + MarketRates
{
    pub async fn assign_provider(&self, lock_order_id: i64) -> Result<MatchOutcome, MatchingError> {
        let order =
            self.db.fetch_lock_order(lock_order_id).await?.ok_or(MatchingError::LockOrderNotFound(lock_order_id))?;
        self.match_order(order).await
    }

    async fn match_order(&self, order: LockPaymentOrder) -> Result<MatchOutcome, MatchingError> {
        if order.status != LockOrderStatus::Pending {
            return Ok(MatchOutcome::AlreadyTaken { status: order.status });
        }
        let market_rate =
            self.db.market_rate(&order.currency).await?.ok_or_else(|| MatchingError::NoMarketRate(order.currency.clone()))?;
        let buckets = match self.db.fetch_fiat_currency(&order.currency).await? {
            Some(currency) => self.db.fetch_provision_buckets(currency.id).await?,
            None => vec![],
        };
        let value = order.fiat_value();
        let Some(bucket) = select_bucket(&buckets, value).cloned() else {
            error!(
                "🤝️ No {} provision bucket covers {value} (lock order #{}). Check the bucket configuration.",
                order.currency, order.id
            );
            return self.unmatched(&order, UnmatchedReason::NoBucket).await;
        };
        let candidates = self.db.fetch_bucket_candidates(bucket.id, order.token_id).await?;
        let total = candidates.len();
        let ranked = rank_candidates(candidates, order.amount, order.rate, market_rate);
        trace!("🤝️ Lock order #{}: {} of {total} providers in bucket #{} are eligible", order.id, ranked.len(), bucket.id);
        let Some(winner) = ranked.into_iter().next() else {
            debug!("🤝️ No eligible provider in bucket #{} for lock order #{}", bucket.id, order.id);
            return self.unmatched(&order, UnmatchedReason::NoEligibleProvider { bucket_id: bucket.id }).await;
        };
        let provider = winner.provider;
        match self.db.assign_lock_order(order.id, provider.id, bucket.id).await? {
            Some(order) => {
                info!(
                    "🤝️ Lock order #{} ({} {}) assigned to provider #{} ({}) in bucket #{}",
                    order.id, value, order.currency, provider.id, provider.trading_name, bucket.id
                );
                let event = ProviderAssignedEvent { order: order.clone(), provider: provider.clone(), bucket: bucket.clone() };
                self.producers.publish_provider_assigned(event).await;
                Ok(MatchOutcome::Assigned { order, provider, bucket })
            },
            None => {
                let status = self.db.fetch_lock_order(order.id).await?.map(|o| o.status).unwrap_or(order.status);
                warn!("🤝️ Lock order #{} was taken by another matcher (now {status}). Abandoning.", order.id);
                Ok(MatchOutcome::AlreadyTaken { status })
            },
        }
    }

    async fn unmatched(&self, order: &LockPaymentOrder, reason: UnmatchedReason) -> Result<MatchOutcome, MatchingError> {
        let flagged_for_review = match self.db.record_match_failure(order.id, self.options.max_sweeps).await? {
            Some(o) if o.needs_manual_review => {
                error!(
                    "🤝️ Lock order #{} could not be matched after {} passes and needs manual review",
                    o.id, o.match_attempts
                );
                true
            },
            Some(_) => false,
            None => {
                let status = self.db.fetch_lock_order(order.id).await?.map(|o| o.status).unwrap_or(order.status);
                return Ok(MatchOutcome::AlreadyTaken { status });
            },
        };
        Ok(MatchOutcome::Unmatched { reason, flagged_for_review })
    }

    /// Runs one matching pass over the oldest `Pending` orders.
    pub async fn sweep(&self) -> Result<SweepReport, MatchingError> {
        let orders = self.db.fetch_matchable_orders(self.options.batch_size).await?;
        let mut report = SweepReport::default();
        for order in orders {
            let id = order.id;
            match self.match_order(order).await {
                Ok(MatchOutcome::Assigned { .. }) => report.assigned += 1,
                Ok(MatchOutcome::Unmatched { flagged_for_review, .. }) => {
                    report.unmatched += 1;
                    if flagged_for_review {
                        report.flagged += 1;
                    }
                },
                Ok(MatchOutcome::AlreadyTaken { .. }) => report.conflicts += 1,
                // one bad order must not stall the rest of the sweep
                Err(e) => {
                    error!("🤝️ Could not match lock order #{id}: {e}");
                    report.unmatched += 1;
                },
            }
        }
        if report != SweepReport::default() {
            debug!("🤝️ Matching sweep complete: {report:?}");
        }
        Ok(report)
    }

    pub async fn orders_for_manual_review(&self) -> Result<Vec<LockPaymentOrder>, MatchingError> {
        Ok(self.db.fetch_orders_for_manual_review().await?)
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::db_types::{ConversionRateType, ProviderOrderToken, ProvisionMode};

    fn bucket(id: i64, min: i64, max: i64) -> ProvisionBucket {
        ProvisionBucket {
            id,
            currency_id: 1,
            min_amount: Amount::from_units(min),
            max_amount: Amount::from_units(max),
            created_at: Utc::now(),
        }
    }

    fn candidate(id: i64, available: bool, min: i64, max: i64) -> ProviderCandidate {
        let now = Utc::now();
        ProviderCandidate {
            provider: ProviderProfile {
                id,
                trading_name: format!("provider {id}"),
                currency_id: 1,
                provision_mode: ProvisionMode::Auto,
                is_partner: false,
                is_available: available,
                last_seen_at: Some(now),
                last_assigned_at: None,
                callback_url: None,
                created_at: now + Duration::seconds(id),
                updated_at: now,
            },
            token: ProviderOrderToken {
                id,
                provider_id: id,
                token_id: 1,
                min_order_amount: Amount::from_units(min),
                max_order_amount: Amount::from_units(max),
                conversion_rate_type: ConversionRateType::Floating,
                fixed_conversion_rate: Amount::zero(),
                floating_conversion_rate: Amount::zero(),
                rate_slippage_bps: 50,
                address: format!("0xprovider{id}"),
                network: "base".into(),
            },
        }
    }

    #[test]
    fn bucket_selection() {
        let buckets = vec![bucket(1, 1_000, 50_000), bucket(2, 50_001, 500_000)];
        assert_eq!(select_bucket(&buckets, Amount::from_units(75_000)).map(|b| b.id), Some(2));
        assert_eq!(select_bucket(&buckets, Amount::from_units(1_000)).map(|b| b.id), Some(1));
        assert_eq!(select_bucket(&buckets, Amount::from_units(50_000)).map(|b| b.id), Some(1));
        assert_eq!(select_bucket(&buckets, Amount::from_units(50_001)).map(|b| b.id), Some(2));
        // inside the sub-unit gap between the two buckets
        assert_eq!(select_bucket(&buckets, "50000.5".parse().unwrap()).map(|b| b.id), Some(2));
        assert_eq!(select_bucket(&buckets, Amount::from_units(500_000)).map(|b| b.id), Some(2));
        assert!(select_bucket(&buckets, Amount::from_units(999)).is_none());
        assert!(select_bucket(&buckets, Amount::from_units(500_001)).is_none());
        assert!(select_bucket(&[], Amount::from_units(10)).is_none());
    }

    #[test]
    fn shared_boundary_goes_to_lower_bucket() {
        let buckets = vec![bucket(1, 0, 100), bucket(2, 100, 200)];
        assert_eq!(select_bucket(&buckets, Amount::from_units(100)).map(|b| b.id), Some(1));
        assert_eq!(select_bucket(&buckets, "100.000001".parse().unwrap()).map(|b| b.id), Some(2));
    }

    #[test]
    fn ranking_filters_ineligible_providers() {
        let rate = Amount::from_units(1500);
        let candidates = vec![
            candidate(1, false, 0, 1_000),
            candidate(2, true, 100, 1_000),
            candidate(3, true, 0, 40),
            candidate(4, true, 0, 1_000),
        ];
        let ranked = rank_candidates(candidates, Amount::from_units(50), rate, rate);
        let ids = ranked.iter().map(|c| c.provider.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn ranking_respects_slippage() {
        let mut far = candidate(1, true, 0, 1_000);
        far.token.floating_conversion_rate = Amount::from_units(-10);
        let near = candidate(2, true, 0, 1_000);
        let ranked = rank_candidates(vec![far, near], Amount::from_units(50), Amount::from_units(1500), Amount::from_units(1500));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].provider.id, 2);
    }

    #[test]
    fn least_recently_assigned_wins() {
        let now = Utc::now();
        let mut a = candidate(1, true, 0, 1_000);
        a.provider.last_assigned_at = Some(now);
        let mut b = candidate(2, true, 0, 1_000);
        b.provider.last_assigned_at = Some(now - Duration::minutes(5));
        let c = candidate(3, true, 0, 1_000);
        let d = candidate(4, true, 0, 1_000);
        let rate = Amount::from_units(1500);
        let ranked = rank_candidates(vec![a, b, d, c], Amount::from_units(50), rate, rate);
        let ids = ranked.iter().map(|c| c.provider.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 4, 2, 1]);
    }
}
