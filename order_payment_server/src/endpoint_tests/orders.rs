use actix_web::{http::StatusCode, test::TestRequest};
use order_payment_engine::{
    db_types::{PaymentEventSource, PaymentStatus, ProviderCode},
    payment_objects::SettlementEvent,
    traits::ProviderStatus,
};
use serde_json::json;

use super::{
    helpers::{accept_sessions, admin, create_order, order_json, send, send_json, test_api},
    mocks::MockProviderCalls,
};

#[actix_web::test]
async fn health_check() {
    let api = test_api(MockProviderCalls::new()).await;
    let (status, body) = send(&api, TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn create_order_computes_the_total() {
    let api = test_api(MockProviderCalls::new()).await;
    let (status, body) = send_json(&api, TestRequest::post().uri("/orders").set_json(order_json())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total_price"], "64.99");
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["status"], "pending");
    assert!(body["order_id"].as_str().unwrap().starts_with("ord_"));
}

#[actix_web::test]
async fn empty_cart_is_rejected() {
    let api = test_api(MockProviderCalls::new()).await;
    let mut order = order_json();
    order["line_items"] = json!([]);
    let (status, body) = send(&api, TestRequest::post().uri("/orders").set_json(order)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"error":"Cannot create an order from an empty cart"}"#);
}

#[actix_web::test]
async fn incomplete_address_is_rejected() {
    let api = test_api(MockProviderCalls::new()).await;
    let mut order = order_json();
    order["billing_address"]["city"] = json!("");
    let (status, body) = send(&api, TestRequest::post().uri("/orders").set_json(order)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("billing address is missing required fields: city"), "was: {body}");
}

#[actix_web::test]
async fn oversized_order_total_is_rejected() {
    let api = test_api(MockProviderCalls::new()).await;
    let mut order = order_json();
    order["line_items"][0]["unit_price"] = json!("50000000000000000000000000000");
    let (status, body) = send(&api, TestRequest::post().uri("/orders").set_json(order)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("The total for sku-shirt is too large"), "was: {body}");
}

#[actix_web::test]
async fn malformed_order_body() {
    let api = test_api(MockProviderCalls::new()).await;
    let req = TestRequest::post().uri("/orders").set_json(json!({ "line_items": "lots" }));
    let (status, body) = send(&api, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Could not read request body"), "was: {body}");
}

#[actix_web::test]
async fn fetch_order_with_its_payment() {
    let mut calls = MockProviderCalls::new();
    accept_sessions(&mut calls);
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let req = TestRequest::post().uri("/payments").set_json(json!({ "order_id": order.order_id, "provider": "stripe" }));
    let (status, _) = send(&api, req).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send_json(&api, TestRequest::get().uri(&format!("/orders/{}", order.order_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["order_id"], order.order_id.as_str());
    assert_eq!(body["current_payment"]["status"], "pending");
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);

    let (status, body) = send(&api, TestRequest::get().uri("/orders/ord_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"error":"Order ord_missing does not exist"}"#);
}

#[actix_web::test]
async fn status_changes_need_the_admin_token() {
    let api = test_api(MockProviderCalls::new()).await;
    let order = create_order(&api).await;
    let uri = format!("/orders/{}/status", order.order_id);

    let req = TestRequest::patch().uri(&uri).set_json(json!({ "status": "cancelled" }));
    let (status, _) = send(&api, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = TestRequest::patch()
        .uri(&uri)
        .insert_header(("Authorization", "Bearer guess"))
        .set_json(json!({ "status": "cancelled" }));
    let (status, body) = send(&api, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("Invalid admin token"));
    assert_eq!(api.fetch_order(&order.order_id).await.unwrap().status.as_str(), "pending");
}

#[actix_web::test]
async fn fulfillment_transitions() {
    let mut calls = MockProviderCalls::new();
    accept_sessions(&mut calls);
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let uri = format!("/orders/{}/status", order.order_id);

    // Only a completed payment moves an order into processing
    let req = admin(TestRequest::patch().uri(&uri).set_json(json!({ "status": "processing" })));
    let (status, body) = send(&api, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.contains("cannot move from pending to processing"), "was: {body}");

    let session = api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let paid = ProviderStatus::new(PaymentStatus::Completed, "paid").with_amount(order.total_price, "USD");
    api.settle(SettlementEvent::new(session.payment.payment_id, paid, PaymentEventSource::Webhook)).await.unwrap();

    let req = admin(TestRequest::patch().uri(&uri).set_json(json!({ "status": "shipped" })));
    let (status, body) = send_json(&api, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "shipped");

    let req = admin(TestRequest::patch().uri(&uri).set_json(json!({ "status": "pending" })));
    let (status, _) = send(&api, req).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let req = admin(TestRequest::patch().uri(&uri).set_json(json!({ "status": "teleported" })));
    let (status, body) = send(&api, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Could not read request body"), "was: {body}");
}
