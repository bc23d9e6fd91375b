//! Event hooks that tell the outside world what the engine is doing.
//!
//! * Merchants receive `payment_order.*` webhooks for orders that were created with a webhook URL.
//! * Providers receive an `order.assigned` notification at their callback URL when the matcher picks them.
//! * Orders that need a refund and webhooks that could not be delivered are escalated in the logs.
//!
//! Notifications go through the [`WebhookApi`], so they are signed and retried with backoff like any other webhook.
use std::sync::Arc;

use aggregator_engine::{
    agg_api::{EnqueueOutcome, MatchOutcome, WebhookApi},
    db_types::{PaymentOrder, PaymentOrderStatus},
    events::{EventHandlers, EventHooks, OrderCancelledEvent, ProviderAssignedEvent},
    MatchingApi,
    SqliteDatabase,
};
use futures::future::BoxFuture;
use log::*;

use crate::{data_objects::OrderAssignment, integrations::HttpWebhookTransport};

pub type Webhooks = WebhookApi<SqliteDatabase, HttpWebhookTransport>;

pub const EVENT_BUFFER_SIZE: usize = 50;

pub const PAYMENT_ORDER_PENDING: &str = "payment_order.pending";
pub const PAYMENT_ORDER_SETTLED: &str = "payment_order.settled";
pub const PAYMENT_ORDER_REFUNDED: &str = "payment_order.refunded";
pub const PAYMENT_ORDER_EXPIRED: &str = "payment_order.expired";
pub const ORDER_ASSIGNED: &str = "order.assigned";

/// Handlers that only log. These have no dependencies, so they are created first and their producers are handed to
/// the webhook API itself.
pub fn create_alert_handlers() -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks.on_order_cancelled(|ev| {
        let OrderCancelledEvent { order, reason, refund_required } = ev;
        if refund_required {
            error!(
                "🚨️ Lock order #{} ({} tokens, tx {}) has been cancelled {} times and must be refunded. Last reason: \
                 {reason}",
                order.id, order.amount, order.tx_hash, order.cancellation_count
            );
        } else {
            info!("🔔️ Lock order #{} is back in the matching pool. Reason: {reason}", order.id);
        }
        no_op()
    });
    hooks.on_webhook_exhausted(|ev| {
        let attempt = ev.attempt;
        error!(
            "🚨️ Gave up delivering {} webhook #{} to {} after {} attempts. Last error: {}",
            attempt.event,
            attempt.id,
            attempt.url,
            attempt.attempt_number,
            attempt.last_error.unwrap_or_default()
        );
        no_op()
    });
    EventHandlers::new(EVENT_BUFFER_SIZE, hooks)
}

/// Merchant webhooks for settled, refunded and expired orders, and assignment notifications for providers.
pub fn create_notification_handlers(webhooks: Arc<Webhooks>) -> EventHandlers {
    let mut hooks = EventHooks::default();
    let api = Arc::clone(&webhooks);
    hooks.on_provider_assigned(move |ev| {
        let ProviderAssignedEvent { order, provider, .. } = ev;
        let Some(url) = provider.callback_url.clone() else {
            info!(
                "🔔️ Provider #{} ({}) has no callback URL. It will have to poll for lock order #{}.",
                provider.id, provider.trading_name, order.id
            );
            return no_op();
        };
        let api = Arc::clone(&api);
        Box::pin(async move {
            let assignment = OrderAssignment::from(&order);
            log_outcome(ORDER_ASSIGNED, order.id, api.enqueue(ORDER_ASSIGNED, &assignment, &url).await);
        })
    });
    let api = Arc::clone(&webhooks);
    hooks.on_order_validated(move |ev| {
        if ev.payment_order.status != PaymentOrderStatus::Settled {
            debug!(
                "🔔️ Lock order #{} validated. Payment order #{} is only partially funded, so it is not settled yet.",
                ev.order.id, ev.payment_order.id
            );
            return no_op();
        }
        notify_merchant(Arc::clone(&api), PAYMENT_ORDER_SETTLED, ev.payment_order)
    });
    let api = Arc::clone(&webhooks);
    hooks.on_order_refunded(move |ev| {
        if ev.payment_order.status != PaymentOrderStatus::Refunded {
            debug!(
                "🔔️ Lock order #{} refunded. Payment order #{} has other deposits outstanding or paid out.",
                ev.order.id, ev.payment_order.id
            );
            return no_op();
        }
        notify_merchant(Arc::clone(&api), PAYMENT_ORDER_REFUNDED, ev.payment_order)
    });
    let api = webhooks;
    hooks.on_payment_order_expired(move |ev| {
        notify_merchant(Arc::clone(&api), PAYMENT_ORDER_EXPIRED, ev.payment_order)
    });
    EventHandlers::new(EVENT_BUFFER_SIZE, hooks)
}

/// Tells the merchant their order is funded and tries to match the new lock order straight away, rather than waiting
/// for the next matching sweep.
pub fn create_deposit_handlers(webhooks: Arc<Webhooks>, matching: Arc<MatchingApi<SqliteDatabase>>) -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks.on_lock_order_created(move |ev| {
        let webhooks = Arc::clone(&webhooks);
        let matching = Arc::clone(&matching);
        Box::pin(async move {
            let id = ev.order.id;
            match matching.assign_provider(id).await {
                Ok(MatchOutcome::Assigned { provider, .. }) => {
                    debug!("🔔️ Lock order #{id} was matched to provider #{} on arrival", provider.id)
                },
                Ok(outcome) => debug!("🔔️ Lock order #{id} was not matched on arrival: {outcome:?}"),
                Err(e) => warn!("🔔️ Could not match lock order #{id} on arrival. The sweeper will retry. {e}"),
            }
            notify_merchant(webhooks, PAYMENT_ORDER_PENDING, ev.payment_order).await;
        })
    });
    EventHandlers::new(EVENT_BUFFER_SIZE, hooks)
}

fn notify_merchant(webhooks: Arc<Webhooks>, event: &'static str, order: PaymentOrder) -> BoxFuture<'static, ()> {
    let Some(url) = order.webhook_url.clone() else {
        trace!("🔔️ Payment order #{} has no webhook URL. Skipping {event}.", order.id);
        return no_op();
    };
    Box::pin(async move {
        log_outcome(event, order.id, webhooks.enqueue(event, &order, &url).await);
    })
}

fn log_outcome<E: std::fmt::Display>(event: &str, id: i64, outcome: Result<EnqueueOutcome, E>) {
    match outcome {
        Ok(EnqueueOutcome::Delivered) => debug!("🔔️ {event} for #{id} delivered"),
        Ok(EnqueueOutcome::Scheduled(a)) => info!("🔔️ {event} for #{id} will be retried at {}", a.next_retry_time),
        Ok(EnqueueOutcome::Failed(a) | EnqueueOutcome::Exhausted(a)) => {
            warn!("🔔️ {event} for #{id} could not be delivered to {}", a.url)
        },
        Err(e) => error!("🔔️ Could not enqueue {event} for #{id}. {e}"),
    }
}

fn no_op() -> BoxFuture<'static, ()> {
    Box::pin(async {})
}
