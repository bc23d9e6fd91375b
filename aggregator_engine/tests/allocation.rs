mod support;

use std::collections::HashSet;

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use support::{deposit, Fixture, CURRENCY};

use aggregator_engine::{
    agg_api::{AllocatorError, AllocatorOptions},
    db_types::{PaymentOrderStatus, ReceiveAddressStatus},
    traits::{AddressManagement, PaymentOrderManagement},
};

#[tokio::test]
async fn new_order_gets_a_fresh_address() {
    let fx = Fixture::new().await;
    let (order, address) = fx.create_payment_order(50).await;
    assert_eq!(order.status, PaymentOrderStatus::Initiated);
    assert_eq!(order.receive_address_text.as_deref(), Some(address.address.as_str()));
    assert_eq!(address.payment_order_id, Some(order.id));
    assert_eq!(address.status, ReceiveAddressStatus::Unused);
    assert_eq!(address.account_index, 0);
    assert_eq!(address.last_indexed_block, 1_000);
    assert!(address.valid_until > Utc::now());
}

#[tokio::test]
async fn allocation_is_idempotent_per_order() {
    let fx = Fixture::new().await;
    let (order, address) = fx.create_payment_order(50).await;
    let again = fx.allocator().allocate_address(order.id).await.expect("Allocation failed");
    assert_eq!(again.id, address.id);
    assert_eq!(fx.db.next_account_index().await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_allocations_never_share_an_index() {
    let fx = Fixture::new().await;
    let allocator = fx.allocator();
    let mut orders = vec![];
    for _ in 0..16 {
        orders.push(fx.db.insert_payment_order(fx.new_payment_order(10)).await.unwrap());
    }
    let results = join_all(orders.iter().map(|o| allocator.allocate_address(o.id))).await;
    let addresses = results.into_iter().map(|r| r.expect("Allocation failed")).collect::<Vec<_>>();
    let indices = addresses.iter().map(|a| a.account_index).collect::<HashSet<_>>();
    let strings = addresses.iter().map(|a| a.address.clone()).collect::<HashSet<_>>();
    let owners = addresses.iter().map(|a| a.payment_order_id).collect::<HashSet<_>>();
    assert_eq!(indices.len(), 16);
    assert_eq!(strings.len(), 16);
    assert_eq!(owners.len(), 16);
}

#[tokio::test]
async fn unused_addresses_are_recycled_after_expiry() {
    let fx = Fixture::new().await;
    let allocator = fx.allocator();
    let (first, address) = fx.create_payment_order(50).await;

    let expired = allocator.expire_unfunded_orders(Utc::now() + Duration::hours(1)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, first.id);
    assert_eq!(expired[0].status, PaymentOrderStatus::Expired);
    let released = fx.db.fetch_receive_address(&address.address).await.unwrap().unwrap();
    assert_eq!(released.status, ReceiveAddressStatus::Expired);
    assert_eq!(released.payment_order_id, None);

    let (second, reused) = fx.create_payment_order(20).await;
    assert_eq!(reused.address, address.address);
    assert_eq!(reused.account_index, address.account_index);
    assert_eq!(reused.payment_order_id, Some(second.id));
    assert_eq!(reused.status, ReceiveAddressStatus::Unused);

    // the expired order cannot take its address back
    let err = allocator.allocate_address(first.id).await.unwrap_err();
    assert!(matches!(err, AllocatorError::OrderNotAwaitingFunds(_, PaymentOrderStatus::Expired)));
}

#[tokio::test]
async fn funded_addresses_are_never_reused() {
    let fx = Fixture::new().await;
    let (order, address) = fx.create_payment_order(50).await;
    fx.indexer().record_deposit(deposit(&address.address, 10, "0xpartial", 1_005)).await.unwrap();

    let funded = fx.db.fetch_payment_order(order.id).await.unwrap().unwrap();
    assert_eq!(funded.status, PaymentOrderStatus::Pending);
    // a partially funded order no longer expires
    let expired = fx.allocator().expire_unfunded_orders(Utc::now() + Duration::hours(1)).await.unwrap();
    assert!(expired.is_empty());

    let released = fx.db.release_address(order.id).await.unwrap().unwrap();
    assert_eq!(released.status, ReceiveAddressStatus::Expired);
    assert_eq!(released.payment_order_id, Some(order.id));

    let (_, next) = fx.create_payment_order(20).await;
    assert_ne!(next.address, address.address);
    assert_eq!(next.account_index, 1);
}

#[tokio::test]
async fn orders_within_their_window_do_not_expire() {
    let fx = Fixture::new().await;
    let allocator = fx.allocator_with(AllocatorOptions { validity: Duration::minutes(30), ..Default::default() });
    let (order, _) = allocator.create_payment_order(fx.new_payment_order(50)).await.unwrap();
    let expired = allocator.expire_unfunded_orders(Utc::now() + Duration::minutes(10)).await.unwrap();
    assert!(expired.is_empty());
    let order = fx.db.fetch_payment_order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, PaymentOrderStatus::Initiated);
}

#[tokio::test]
async fn invalid_orders_are_rejected() {
    let fx = Fixture::new().await;
    let mut order = fx.new_payment_order(0);
    let err = fx.allocator().create_payment_order(order.clone()).await.unwrap_err();
    assert!(matches!(err, AllocatorError::InvalidOrder(_)));
    order.amount = agg_common::Amount::from_units(5);
    order.rate = agg_common::Amount::zero();
    let err = fx.allocator().create_payment_order(order).await.unwrap_err();
    assert!(matches!(err, AllocatorError::InvalidOrder(_)));
}

#[tokio::test]
async fn writes_are_visible_on_every_pooled_connection() {
    let fx = Fixture::new().await;
    let (order, address) = fx.create_payment_order(50).await;
    let expired = fx.allocator().expire_unfunded_orders(Utc::now() + Duration::hours(1)).await.unwrap();
    assert_eq!(expired.len(), 1);
    fx.catalog().set_market_rate(CURRENCY, agg_common::Amount::from_units(1_612)).await.unwrap();

    // Hold every connection in the pool at once, so each check runs on a different one
    let mut connections = vec![];
    for _ in 0..5 {
        connections.push(fx.db.pool().acquire().await.unwrap());
    }
    for conn in connections.iter_mut() {
        let (expired,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payment_orders WHERE id = $1 AND status = $2")
            .bind(order.id)
            .bind(PaymentOrderStatus::Expired)
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(expired, 1);
        let (released,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM receive_addresses WHERE id = $1 AND payment_order_id IS NULL")
                .bind(address.id)
                .fetch_one(&mut **conn)
                .await
                .unwrap();
        assert_eq!(released, 1);
        let (rate,): (agg_common::Amount,) = sqlx::query_as("SELECT market_rate FROM fiat_currencies WHERE code = $1")
            .bind(CURRENCY)
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(rate, agg_common::Amount::from_units(1_612));
    }
}
