use actix_web::http::StatusCode;
use aggregator_engine::db_types::{LockOrderStatus, LockPaymentOrder, PaymentOrderStatus};
use serde_json::{json, Value};

use super::helpers::{TestAggregator, PROVIDER_SECRET};
use crate::data_objects::{LockOrderResponse, PaymentOrderResponse};

fn fulfill_body(provider_id: i64) -> Value {
    json!({ "provider_id": provider_id, "tx_id": "PSP-20241019-0001", "psp": "paystack" })
}

async fn fetch_lock_order(app: &TestAggregator, id: i64) -> LockOrderResponse {
    let (status, body) = app.get(&format!("/v1/orders/{id}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    serde_json::from_str(&body).unwrap()
}

#[actix_web::test]
async fn unsigned_callbacks_are_rejected() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xabc001").await;
    let err = app
        .call(
            actix_web::test::TestRequest::post()
                .uri(&format!("/v1/provider/orders/{}/fulfill", order.id))
                .set_json(fulfill_body(app.provider.id)),
        )
        .await
        .expect_err("Expected the request to be rejected");
    assert_eq!(err, "No HMAC signature found.");
    let order = fetch_lock_order(&app, order.id).await;
    assert_eq!(order.order.status, LockOrderStatus::Processing);
}

#[actix_web::test]
async fn callbacks_with_a_bad_signature_are_rejected() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xabc002").await;
    let path = format!("/v1/provider/orders/{}/fulfill", order.id);
    let err = app
        .signed_post(&path, &fulfill_body(app.provider.id), "not-the-provider-secret")
        .await
        .expect_err("Expected the request to be rejected");
    assert_eq!(err, "Invalid HMAC signature.");
}

#[actix_web::test]
async fn fulfil_and_validate() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xabc003").await;

    let path = format!("/v1/provider/orders/{}/fulfill", order.id);
    let (status, body) = app.signed_post(&path, &fulfill_body(app.provider.id), PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::OK, "{body}");
    let result = serde_json::from_str::<Value>(&body).unwrap();
    let fulfilled = serde_json::from_value::<LockPaymentOrder>(result["order"].clone()).unwrap();
    assert_eq!(fulfilled.status, LockOrderStatus::Fulfilled);
    assert_eq!(result["fulfillment"]["tx_id"], "PSP-20241019-0001");

    // Reporting the same payout twice is a conflict
    let (status, _) = app.signed_post(&path, &fulfill_body(app.provider.id), PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::CONFLICT);

    let path = format!("/v1/provider/orders/{}/validate", order.id);
    let (status, body) = app.signed_post(&path, &json!({ "status": "success" }), PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::OK, "{body}");
    let validated = serde_json::from_str::<LockPaymentOrder>(&body).unwrap();
    assert_eq!(validated.status, LockOrderStatus::Validated);

    let (status, body) = app.get(&format!("/v1/payment_orders/{}", order.payment_order_id)).await;
    assert_eq!(status, StatusCode::OK);
    let payment_order = serde_json::from_str::<PaymentOrderResponse>(&body).unwrap();
    assert_eq!(payment_order.order.status, PaymentOrderStatus::Settled);
}

#[actix_web::test]
async fn failed_validation_returns_the_order_to_the_pool() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xabc004").await;
    let path = format!("/v1/provider/orders/{}/fulfill", order.id);
    let (status, _) = app.signed_post(&path, &fulfill_body(app.provider.id), PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    let path = format!("/v1/provider/orders/{}/validate", order.id);
    let verdict = json!({ "status": "failed", "reason": "Account name mismatch" });
    let (status, body) = app.signed_post(&path, &verdict, PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::OK, "{body}");

    let fetched = fetch_lock_order(&app, order.id).await;
    assert_eq!(fetched.order.status, LockOrderStatus::Pending);
    assert_eq!(fetched.order.cancellation_count, 1);
    assert_eq!(fetched.order.provider_id, None);
    assert_eq!(fetched.cancellations.len(), 1);
    assert!(fetched.cancellations[0].reason.contains("Account name mismatch"));
}

#[actix_web::test]
async fn only_the_assignee_may_act() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xabc005").await;
    let intruder = app.provider.id + 100;
    let path = format!("/v1/provider/orders/{}/fulfill", order.id);
    let (status, _) = app.signed_post(&path, &fulfill_body(intruder), PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::FORBIDDEN);
    let path = format!("/v1/provider/orders/{}/cancel", order.id);
    let body = json!({ "provider_id": intruder, "reason": "Not mine" });
    let (status, _) = app.signed_post(&path, &body, PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn validating_an_unfulfilled_order_is_a_conflict() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xabc006").await;
    let path = format!("/v1/provider/orders/{}/validate", order.id);
    let (status, body) = app.signed_post(&path, &json!({ "status": "success" }), PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[actix_web::test]
async fn provider_cancellation() {
    let app = TestAggregator::new().await;
    let order = app.assigned_lock_order(10, "0xabc007").await;
    let path = format!("/v1/provider/orders/{}/cancel", order.id);
    let body = json!({ "provider_id": app.provider.id, "reason": "Bank is offline" });
    let (status, body) = app.signed_post(&path, &body, PROVIDER_SECRET).await.unwrap();
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.contains(&format!("Lock order #{} is now Pending", order.id)), "{body}");

    let fetched = fetch_lock_order(&app, order.id).await;
    assert_eq!(fetched.order.cancellation_count, 1);
    assert_eq!(fetched.cancellations[0].reason, "Bank is offline");
}
