mod support;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use support::Fixture;
use tokio::sync::mpsc;

use aggregator_engine::{
    agg_api::{FulfillmentApi, FulfillmentError, FulfillmentOptions, MatchOutcome, MatchingApi, ValidationOutcome},
    db_types::{LockOrderStatus, LockPaymentOrder, PaymentOrderStatus, ProviderProfile, ValidationStatus},
    events::{EventHandlers, EventHooks, EventProducers, OrderCancelledEvent},
    traits::{LockOrderManagement, PaymentOrderManagement},
    SqliteDatabase,
};

fn fulfiller(fx: &Fixture) -> FulfillmentApi<SqliteDatabase> {
    FulfillmentApi::new(fx.db.clone(), FulfillmentOptions::default(), EventProducers::default())
}

async fn assign(fx: &Fixture, lock_order_id: i64) -> (LockPaymentOrder, ProviderProfile) {
    let matcher = MatchingApi::new(fx.db.clone(), Default::default(), EventProducers::default());
    match matcher.assign_provider(lock_order_id).await.unwrap() {
        MatchOutcome::Assigned { order, provider, .. } => (order, provider),
        other => panic!("Expected an assignment, got {other:?}"),
    }
}

fn assert_cancellations_consistent(order: &LockPaymentOrder) {
    assert_eq!(order.cancellation_count, order.cancellation_reasons.0.len() as i64);
}

#[tokio::test]
async fn happy_path_settles_the_payment_order() {
    let fx = Fixture::new().await;
    fx.add_provider("payer", fx.buckets[1].id, 0, 1_000).await;
    let lock = fx.funded_lock_order(50, "0xhappy").await;
    let (lock, provider) = assign(&fx, lock.id).await;
    let api = fulfiller(&fx);

    let (order, fulfillment) = api.mark_fulfilled(lock.id, provider.id, "NIP-0001", "paystack").await.unwrap();
    assert_eq!(order.status, LockOrderStatus::Fulfilled);
    assert_eq!(fulfillment.validation_status, ValidationStatus::Pending);
    assert_eq!(fulfillment.tx_id, "NIP-0001");

    let order = api.validate(lock.id, ValidationOutcome::Success).await.unwrap();
    assert_eq!(order.status, LockOrderStatus::Validated);
    let fulfillments = fx.db.fetch_fulfillments(lock.id).await.unwrap();
    assert_eq!(fulfillments.len(), 1);
    assert_eq!(fulfillments[0].validation_status, ValidationStatus::Success);
    let payment = fx.db.fetch_payment_order(order.payment_order_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentOrderStatus::Settled);
}

#[tokio::test]
async fn partially_funded_orders_do_not_settle() {
    let fx = Fixture::new().await;
    let provider = fx.add_provider("payer", fx.buckets[1].id, 0, 1_000).await;
    let (payment, address) = fx.create_payment_order(100).await;
    let d = support::deposit(&address.address, 50, "0xhalf", 1_010);
    let aggregator_engine::agg_api::DepositOutcome::Recorded(lock) = fx.indexer().record_deposit(d).await.unwrap()
    else {
        panic!("Expected a new lock order");
    };
    assign(&fx, lock.id).await;
    let api = fulfiller(&fx);
    api.mark_fulfilled(lock.id, provider.id, "NIP-0002", "paystack").await.unwrap();
    api.validate(lock.id, ValidationOutcome::Success).await.unwrap();
    let payment = fx.db.fetch_payment_order(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentOrderStatus::Pending);
}

#[tokio::test]
async fn repeated_validation_failures_end_in_a_refund() {
    let fx = Fixture::new().await;
    fx.add_provider("flaky", fx.buckets[1].id, 0, 1_000).await;
    let lock = fx.funded_lock_order(50, "0xflaky").await;
    let api = FulfillmentApi::new(
        fx.db.clone(),
        FulfillmentOptions { max_cancellations: 3, ..Default::default() },
        EventProducers::default(),
    );

    for cycle in 1..=3 {
        let (order, provider) = assign(&fx, lock.id).await;
        assert_eq!(order.status, LockOrderStatus::Processing);
        api.mark_fulfilled(lock.id, provider.id, &format!("NIP-{cycle}"), "paystack").await.unwrap();
        let order = api.validate(lock.id, ValidationOutcome::Failed("amount mismatch".into())).await.unwrap();
        assert_eq!(order.status, LockOrderStatus::Pending);
        assert_eq!(order.cancellation_count, cycle);
        assert_eq!(order.provider_id, None);
        assert_eq!(order.provision_bucket_id, None);
        assert_cancellations_consistent(&order);
    }

    let (_, provider) = assign(&fx, lock.id).await;
    api.mark_fulfilled(lock.id, provider.id, "NIP-4", "paystack").await.unwrap();
    let order = api.validate(lock.id, ValidationOutcome::Failed("amount mismatch".into())).await.unwrap();
    assert_eq!(order.status, LockOrderStatus::Cancelled);
    assert_eq!(order.cancellation_count, 4);
    assert_cancellations_consistent(&order);
    assert_eq!(order.cancellation_reasons.0[0], "Validation failed: amount mismatch");

    let fulfillments = fx.db.fetch_fulfillments(lock.id).await.unwrap();
    assert_eq!(fulfillments.len(), 4);
    assert!(fulfillments.iter().all(|f| f.validation_status == ValidationStatus::Failed));
    assert_eq!(fx.db.fetch_cancellations(lock.id).await.unwrap().len(), 4);

    // a cancelled order cannot be matched again
    let matcher = MatchingApi::new(fx.db.clone(), Default::default(), EventProducers::default());
    let outcome = matcher.assign_provider(lock.id).await.unwrap();
    assert_eq!(outcome, MatchOutcome::AlreadyTaken { status: LockOrderStatus::Cancelled });

    let order = api.refund(lock.id, "0xrefund").await.unwrap();
    assert_eq!(order.status, LockOrderStatus::Refunded);
    assert!(order.is_refunded);
    assert!(!order.is_refund_confirmed);
    assert_eq!(order.refund_tx_hash.as_deref(), Some("0xrefund"));
    let payment = fx.db.fetch_payment_order(order.payment_order_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentOrderStatus::Refunded);

    let order = api.confirm_refund(lock.id).await.unwrap();
    assert!(order.is_refund_confirmed);
    let again = api.confirm_refund(lock.id).await.unwrap();
    assert!(again.is_refund_confirmed);
    assert!(matches!(
        api.refund(lock.id, "0xrefund2").await,
        Err(FulfillmentError::InvalidTransition { status: LockOrderStatus::Refunded, .. })
    ));
}

async fn split_deposit(fx: &Fixture, payment_order: i64, address: &str, tx_hashes: [&str; 2]) -> [LockPaymentOrder; 2] {
    let mut locks = vec![];
    for (i, tx_hash) in tx_hashes.into_iter().enumerate() {
        let d = support::deposit(address, 50, tx_hash, 1_010 + i as i64);
        match fx.indexer().record_deposit(d).await.unwrap() {
            aggregator_engine::agg_api::DepositOutcome::Recorded(lock) => {
                assert_eq!(lock.payment_order_id, payment_order);
                locks.push(lock)
            },
            other => panic!("Expected a new lock order, got {other:?}"),
        }
    }
    [locks.remove(0), locks.remove(0)]
}

#[tokio::test]
async fn refunding_one_deposit_leaves_a_paid_out_sibling_alone() {
    let fx = Fixture::new().await;
    fx.add_provider("payer", fx.buckets[1].id, 0, 1_000).await;
    let api = FulfillmentApi::new(
        fx.db.clone(),
        FulfillmentOptions { max_cancellations: 0, ..Default::default() },
        EventProducers::default(),
    );
    let (payment, address) = fx.create_payment_order(100).await;
    let [paid, declined] = split_deposit(&fx, payment.id, &address.address, ["0xsplit1", "0xsplit2"]).await;

    let (_, provider) = assign(&fx, paid.id).await;
    api.mark_fulfilled(paid.id, provider.id, "NIP-0100", "paystack").await.unwrap();
    let paid = api.validate(paid.id, ValidationOutcome::Success).await.unwrap();
    assert_eq!(paid.status, LockOrderStatus::Validated);

    let (_, provider) = assign(&fx, declined.id).await;
    let declined = api.cancel(declined.id, provider.id, "Insufficient float").await.unwrap();
    assert_eq!(declined.status, LockOrderStatus::Cancelled);
    let refunded = api.refund(declined.id, "0xrefund-split").await.unwrap();
    assert_eq!(refunded.status, LockOrderStatus::Refunded);

    let payment = fx.db.fetch_payment_order(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentOrderStatus::Pending);
    let paid = fx.db.fetch_lock_order(paid.id).await.unwrap().unwrap();
    assert_eq!(paid.status, LockOrderStatus::Validated);
}

#[tokio::test]
async fn payment_orders_are_refunded_with_their_last_deposit() {
    let fx = Fixture::new().await;
    fx.add_provider("payer", fx.buckets[1].id, 0, 1_000).await;
    let api = FulfillmentApi::new(
        fx.db.clone(),
        FulfillmentOptions { max_cancellations: 0, ..Default::default() },
        EventProducers::default(),
    );
    let (payment, address) = fx.create_payment_order(100).await;
    let [first, second] = split_deposit(&fx, payment.id, &address.address, ["0xboth1", "0xboth2"]).await;

    let (_, provider) = assign(&fx, first.id).await;
    api.cancel(first.id, provider.id, "Bank offline").await.unwrap();
    api.refund(first.id, "0xrefund-both1").await.unwrap();
    // the second deposit is still waiting for a provider
    let status = fx.db.fetch_payment_order(payment.id).await.unwrap().unwrap().status;
    assert_eq!(status, PaymentOrderStatus::Pending);

    let (_, provider) = assign(&fx, second.id).await;
    api.cancel(second.id, provider.id, "Bank offline").await.unwrap();
    api.refund(second.id, "0xrefund-both2").await.unwrap();
    let status = fx.db.fetch_payment_order(payment.id).await.unwrap().unwrap().status;
    assert_eq!(status, PaymentOrderStatus::Refunded);
}

#[tokio::test]
async fn declined_orders_go_back_to_the_pool() {
    let fx = Fixture::new().await;
    let bucket = fx.buckets[1].id;
    let first = fx.add_provider("first", bucket, 0, 1_000).await;
    let second = fx.add_provider("second", bucket, 0, 1_000).await;
    let lock = fx.funded_lock_order(50, "0xdecline").await;
    let (_, provider) = assign(&fx, lock.id).await;
    assert_eq!(provider.id, first.id);

    let order = fulfiller(&fx).cancel(lock.id, first.id, "Insufficient float").await.unwrap();
    assert_eq!(order.status, LockOrderStatus::Pending);
    assert_eq!(order.cancellation_count, 1);
    assert_eq!(order.cancellation_reasons.0, vec!["Insufficient float".to_string()]);
    let history = fx.db.fetch_cancellations(lock.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].provider_id, Some(first.id));

    let (_, provider) = assign(&fx, lock.id).await;
    assert_eq!(provider.id, second.id);
}

#[tokio::test]
async fn illegal_transitions_are_rejected() {
    let fx = Fixture::new().await;
    let provider = fx.add_provider("payer", fx.buckets[1].id, 0, 1_000).await;
    let other = fx.add_provider("other", fx.buckets[0].id, 0, 1_000).await;
    let lock = fx.funded_lock_order(50, "0xillegal").await;
    let api = fulfiller(&fx);

    let err = api.mark_fulfilled(lock.id, provider.id, "NIP", "paystack").await.unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidTransition { status: LockOrderStatus::Pending, .. }));
    let err = api.cancel(lock.id, provider.id, "no").await.unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidTransition { status: LockOrderStatus::Pending, .. }));
    let err = api.refund(lock.id, "0xrefund").await.unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidTransition { status: LockOrderStatus::Pending, .. }));

    assign(&fx, lock.id).await;
    let err = api.validate(lock.id, ValidationOutcome::Success).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidTransition { status: LockOrderStatus::Processing, .. }));
    let err = api.mark_fulfilled(lock.id, other.id, "NIP", "paystack").await.unwrap_err();
    assert!(matches!(err, FulfillmentError::NotAssignee { .. }));
    let err = api.cancel(lock.id, other.id, "not mine").await.unwrap_err();
    assert!(matches!(err, FulfillmentError::NotAssignee { .. }));

    let err = api.validate(9_999, ValidationOutcome::Success).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::LockOrderNotFound(9_999)));

    let order = fx.db.fetch_lock_order(lock.id).await.unwrap().unwrap();
    assert_eq!(order.status, LockOrderStatus::Processing);
    assert_eq!(order.cancellation_count, 0);
}

#[tokio::test]
async fn stale_orders_are_reclaimed() {
    let fx = Fixture::new().await;
    fx.add_provider("sleepy", fx.buckets[1].id, 0, 1_000).await;
    let lock = fx.funded_lock_order(50, "0xstale").await;
    assign(&fx, lock.id).await;
    let api = fulfiller(&fx);

    let report = api.reclaim_stale_orders(Utc::now() + Duration::minutes(5)).await.unwrap();
    assert_eq!(report.reclaimed, 0);
    let order = fx.db.fetch_lock_order(lock.id).await.unwrap().unwrap();
    assert_eq!(order.status, LockOrderStatus::Processing);

    let report = api.reclaim_stale_orders(Utc::now() + Duration::minutes(11)).await.unwrap();
    assert_eq!(report.reclaimed, 1);
    let order = fx.db.fetch_lock_order(lock.id).await.unwrap().unwrap();
    assert_eq!(order.status, LockOrderStatus::Pending);
    assert_eq!(order.cancellation_count, 1);
    assert_eq!(order.provider_id, None);
    assert_cancellations_consistent(&order);
}

#[tokio::test]
async fn stale_orders_past_the_threshold_are_cancelled() {
    let fx = Fixture::new().await;
    fx.add_provider("sleepy", fx.buckets[1].id, 0, 1_000).await;
    let lock = fx.funded_lock_order(50, "0xsleepy").await;
    let api = FulfillmentApi::new(
        fx.db.clone(),
        FulfillmentOptions { max_cancellations: 1, ..Default::default() },
        EventProducers::default(),
    );
    for expected in [LockOrderStatus::Pending, LockOrderStatus::Cancelled] {
        assign(&fx, lock.id).await;
        api.reclaim_stale_orders(Utc::now() + Duration::minutes(11)).await.unwrap();
        let order = fx.db.fetch_lock_order(lock.id).await.unwrap().unwrap();
        assert_eq!(order.status, expected);
    }
}

#[tokio::test]
async fn cancellations_are_published() {
    let fx = Fixture::new().await;
    let provider = fx.add_provider("decliner", fx.buckets[1].id, 0, 1_000).await;
    let lock = fx.funded_lock_order(50, "0xevents").await;
    assign(&fx, lock.id).await;

    let (tx, mut rx) = mpsc::channel::<OrderCancelledEvent>(4);
    let mut hooks = EventHooks::default();
    hooks.on_order_cancelled(move |ev| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ev).await;
        })
    });
    let handlers = EventHandlers::new(4, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let api = FulfillmentApi::new(fx.db.clone(), FulfillmentOptions::default(), producers);
    api.cancel(lock.id, provider.id, "Bank downtime").await.unwrap();
    let ev = tokio::time::timeout(StdDuration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(ev.order.id, lock.id);
    assert_eq!(ev.reason, "Bank downtime");
    assert!(!ev.refund_required);
}
