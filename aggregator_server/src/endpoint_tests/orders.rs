use actix_web::http::StatusCode;
use agg_common::Amount;
use aggregator_engine::db_types::{LockOrderStatus, PaymentOrderStatus, ReceiveAddressStatus};
use serde_json::json;

use super::helpers::{deposit, new_order_json, TestAggregator, MARKET_RATE};
use crate::data_objects::{DepositResponse, LockOrderResponse, PaymentOrderResponse};

#[actix_web::test]
async fn health_check() {
    let app = TestAggregator::new().await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn create_order_leases_an_address() {
    let app = TestAggregator::new().await;
    let created = app.create_order(10).await;
    assert_eq!(created.order.status, PaymentOrderStatus::Initiated);
    assert_eq!(created.order.rate, Amount::from_units(MARKET_RATE));
    let address = created.receive_address.expect("No receive address");
    assert_eq!(address.status, ReceiveAddressStatus::Unused);
    assert_eq!(address.payment_order_id, Some(created.order.id));

    let (status, body) = app.get(&format!("/v1/payment_orders/{}", created.order.id)).await;
    assert_eq!(status, StatusCode::OK);
    let fetched = serde_json::from_str::<PaymentOrderResponse>(&body).unwrap();
    assert_eq!(fetched.order.id, created.order.id);
    assert_eq!(fetched.receive_address.map(|a| a.address), Some(address.address));
}

#[actix_web::test]
async fn create_order_with_unsupported_currency() {
    let app = TestAggregator::new().await;
    let mut order = new_order_json(10);
    order["currency"] = json!("XYZ");
    let (status, body) = app.post("/v1/orders", &order).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("XYZ is not a supported currency"), "{body}");

    let mut order = new_order_json(10);
    order["network"] = json!("polygon");
    let (status, body) = app.post("/v1/orders", &order).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Unknown network: polygon"), "{body}");
}

#[actix_web::test]
async fn fetch_missing_orders() {
    let app = TestAggregator::new().await;
    let (status, body) = app.get("/v1/payment_orders/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.starts_with(r#"{"error":"#), "{body}");
    let (status, _) = app.get("/v1/orders/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn repeated_deposits_are_recorded_once() {
    let app = TestAggregator::new().await;
    let created = app.create_order(10).await;
    let address = created.receive_address.unwrap().address;
    let transfer = deposit(&address, 10, "0xfeed01");

    let first = match app.deposit(&transfer).await {
        DepositResponse::Recorded { order } => order,
        other => panic!("Expected a new lock order, got {other:?}"),
    };
    assert_eq!(first.payment_order_id, created.order.id);
    assert_eq!(first.tx_hash, "0xfeed01");
    match app.deposit(&transfer).await {
        DepositResponse::Duplicate { order } => assert_eq!(order.id, first.id),
        other => panic!("Expected a duplicate, got {other:?}"),
    }
    // block 1,010 with 12 confirmations puts the chain at 1,021
    assert_eq!(app.context.chain_head.height(), 1_021);

    let (status, body) = app.get(&format!("/v1/payment_orders/{}", created.order.id)).await;
    assert_eq!(status, StatusCode::OK);
    let fetched = serde_json::from_str::<PaymentOrderResponse>(&body).unwrap();
    assert_eq!(fetched.order.status, PaymentOrderStatus::Pending);
    assert_eq!(fetched.order.amount_paid, created.order.amount);
}

#[actix_web::test]
async fn unconfirmed_and_unknown_deposits() {
    let app = TestAggregator::new().await;
    let created = app.create_order(10).await;
    let mut transfer = deposit(&created.receive_address.unwrap().address, 10, "0xfeed02");
    transfer.confirmations = 0;
    match app.deposit(&transfer).await {
        DepositResponse::Unconfirmed { confirmations, required } => {
            assert_eq!(confirmations, 0);
            assert_eq!(required, 1);
        },
        other => panic!("Expected an unconfirmed deposit, got {other:?}"),
    }
    let stranger = deposit("0x000000000000000000000000000000000000dead", 10, "0xfeed03");
    assert!(matches!(app.deposit(&stranger).await, DepositResponse::NotLeased));

    let leased = app.create_order(5).await.receive_address.unwrap().address;
    let empty = deposit(&leased, 0, "0xfeed04");
    let (status, _) = app.post("/v1/deposits", &empty).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn fetch_lock_order() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xfeed05").await;
    let (status, body) = app.get(&format!("/v1/orders/{}", order.id)).await;
    assert_eq!(status, StatusCode::OK);
    let fetched = serde_json::from_str::<LockOrderResponse>(&body).unwrap();
    assert_eq!(fetched.order.status, LockOrderStatus::Processing);
    assert_eq!(fetched.order.provider_id, Some(app.provider.id));
    assert!(fetched.cancellations.is_empty());
}

#[actix_web::test]
async fn refunds_need_a_cancelled_order() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xfeed06").await;
    let (status, body) =
        app.post(&format!("/v1/orders/{}/refund", order.id), &json!({ "refund_tx_hash": "0xrefund" })).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    let (status, _) = app.post(&format!("/v1/orders/{}/refund/confirm", order.id), &json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[actix_web::test]
async fn operator_queues_start_empty() {
    let app = TestAggregator::new().await;
    let (status, body) = app.get("/v1/review/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
    let (status, body) = app.get("/v1/webhooks/exhausted").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
}
