use actix_web::{http::StatusCode, test::TestRequest};
use order_payment_engine::{
    db_types::{PaymentEventSource, PaymentStatus, ProviderCode},
    payment_objects::SettlementEvent,
    traits::{OutcomeHint, ProviderError, ProviderReturn, ProviderSession, ProviderStatus, WebhookNotice},
};
use serde_json::json;

use super::{
    helpers::{accept_sessions, admin, create_order, report_paid, send, send_json, test_api},
    mocks::{MockProviderCalls, SIGNATURE_HEADER},
};

fn open_payment_request(order_id: &str, provider: &str) -> TestRequest {
    TestRequest::post().uri("/payments").set_json(json!({ "order_id": order_id, "provider": provider }))
}

#[actix_web::test]
async fn open_session_returns_checkout_url() {
    let mut calls = MockProviderCalls::new();
    calls.expect_create_session().times(1).returning(|req| {
        assert_eq!(req.amount.to_string(), "64.99");
        assert_eq!(req.return_urls.success_url, "https://shop.example.com/payments/return?provider=stripe");
        Ok(ProviderSession {
            external_reference: "cs_test_1".into(),
            checkout_url: "https://checkout.example.com/cs_test_1".into(),
        })
    });
    let api = test_api(calls).await;
    let order = create_order(&api).await;

    let (status, body) = send_json(&api, open_payment_request(order.order_id.as_str(), "stripe")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["checkout_url"], "https://checkout.example.com/cs_test_1");
    assert_eq!(body["payment"]["status"], "pending");
    assert_eq!(body["payment"]["external_reference"], "cs_test_1");
    assert!(body["suggested_provider"].is_null());

    // A second attempt while the first is still open
    let (status, body) = send(&api, open_payment_request(order.order_id.as_str(), "stripe")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.contains("already has a payment in progress"), "was: {body}");
}

#[actix_web::test]
async fn unsupported_providers_are_rejected() {
    let api = test_api(MockProviderCalls::new()).await;
    let order = create_order(&api).await;
    let (status, body) = send(&api, open_payment_request(order.order_id.as_str(), "paystack")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"error":"Payment provider paystack is not supported"}"#);

    let (status, _) = send(&api, open_payment_request(order.order_id.as_str(), "venmo")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn provider_rejection_is_a_bad_gateway() {
    let mut calls = MockProviderCalls::new();
    calls.expect_create_session().returning(|_| {
        Err(ProviderError::Rejected { provider: ProviderCode::Stripe, message: "Invalid currency".into() })
    });
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let (status, body) = send(&api, open_payment_request(order.order_id.as_str(), "stripe")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("Invalid currency"), "was: {body}");
    let history = api.fetch_order_with_payments(&order.order_id).await.unwrap();
    assert_eq!(history.payments.len(), 1);
    assert_eq!(history.payments[0].status, PaymentStatus::Failed);
}

#[actix_web::test]
async fn provider_timeout_leaves_payment_pending() {
    let mut calls = MockProviderCalls::new();
    calls.expect_create_session().returning(|_| Err(ProviderError::Timeout(ProviderCode::Stripe)));
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let (status, _) = send(&api, open_payment_request(order.order_id.as_str(), "stripe")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let history = api.fetch_order_with_payments(&order.order_id).await.unwrap();
    assert_eq!(history.payments[0].status, PaymentStatus::Pending);
}

#[actix_web::test]
async fn provider_server_error_is_a_gateway_timeout() {
    let mut calls = MockProviderCalls::new();
    calls.expect_create_session().returning(|_| {
        Err(ProviderError::Transport { provider: ProviderCode::Stripe, message: "HTTP 503. upstream unavailable".into() })
    });
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let (status, body) = send(&api, open_payment_request(order.order_id.as_str(), "stripe")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, r#"{"error":"Could not reach stripe: HTTP 503. upstream unavailable"}"#);
    let history = api.fetch_order_with_payments(&order.order_id).await.unwrap();
    assert_eq!(history.payments[0].status, PaymentStatus::Pending);
}

#[actix_web::test]
async fn return_url_settles_from_the_provider() {
    let mut calls = MockProviderCalls::new();
    accept_sessions(&mut calls);
    report_paid(&mut calls);
    calls.expect_parse_return().returning(|params| {
        let reference = params
            .get("session_id")
            .cloned()
            .ok_or(ProviderError::MissingReference { provider: ProviderCode::Stripe })?;
        Ok(ProviderReturn::session(reference, OutcomeHint::Success))
    });
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let session = api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let reference = session.payment.external_reference.clone().unwrap();

    let uri = format!("/payments/return?provider=stripe&session_id={reference}");
    let (status, body) = send_json(&api, TestRequest::get().uri(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["hint"], "success");
    assert_eq!(body["authoritative"], true);
    assert_eq!(body["payment_id"], session.payment.payment_id.as_str());

    // The same URL replayed changes nothing
    let (status, body) = send_json(&api, TestRequest::get().uri(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    let events = api.fetch_payment_events(&session.payment.payment_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, PaymentEventSource::ReturnUrl);

    let (_, body) = send_json(&api, TestRequest::get().uri(&format!("/orders/{}", order.order_id))).await;
    assert_eq!(body["order"]["status"], "processing");
}

#[actix_web::test]
async fn return_url_errors() {
    let mut calls = MockProviderCalls::new();
    calls.expect_parse_return().returning(|params| match params.get("session_id") {
        Some(reference) => Ok(ProviderReturn::session(reference.clone(), OutcomeHint::Unknown)),
        None => Err(ProviderError::MissingReference { provider: ProviderCode::Stripe }),
    });
    let api = test_api(calls).await;

    let (status, body) = send(&api, TestRequest::get().uri("/payments/return?session_id=cs_1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("provider parameter is missing"), "was: {body}");

    let (status, _) = send(&api, TestRequest::get().uri("/payments/return?provider=venmo")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&api, TestRequest::get().uri("/payments/return?provider=stripe")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"error":"The stripe callback did not identify a payment"}"#);

    // A reference nobody issued is never turned into a payment
    let req = TestRequest::get().uri("/payments/return?provider=stripe&session_id=cs_forged");
    let (status, body) = send(&api, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"error":"No stripe payment matches the reference cs_forged"}"#);
}

#[actix_web::test]
async fn webhooks_are_verified_then_settled() {
    let mut calls = MockProviderCalls::new();
    accept_sessions(&mut calls);
    report_paid(&mut calls);
    calls.expect_verify_webhook().returning(|_, signature| match signature.as_deref() {
        Some("good") => Ok(()),
        _ => Err(ProviderError::InvalidSignature(ProviderCode::Stripe)),
    });
    calls.expect_parse_webhook().returning(|body| {
        let body: serde_json::Value = serde_json::from_slice(&body).expect("test webhook is JSON");
        match body["type"].as_str() {
            Some("checkout.session.completed") => {
                Ok(WebhookNotice::session(body["id"].as_str().unwrap_or_default(), "checkout.session.completed"))
            },
            other => Err(ProviderError::UnsupportedEvent {
                provider: ProviderCode::Stripe,
                event_type: other.unwrap_or_default().to_string(),
            }),
        }
    });
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let session = api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let reference = session.payment.external_reference.clone().unwrap();
    let body = json!({ "type": "checkout.session.completed", "id": reference });

    let req = TestRequest::post().uri("/payments/webhook/stripe").set_json(body.clone());
    let (status, resp) = send(&api, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp, r#"{"error":"The webhook signature is missing or invalid"}"#);

    let req = TestRequest::post()
        .uri("/payments/webhook/stripe")
        .insert_header((SIGNATURE_HEADER, "forged"))
        .set_json(body.clone());
    let (status, _) = send(&api, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(api.fetch_payment(&session.payment.payment_id).await.unwrap().status, PaymentStatus::Pending);

    let req = TestRequest::post()
        .uri("/payments/webhook/stripe")
        .insert_header((SIGNATURE_HEADER, "good"))
        .set_json(json!({ "type": "customer.created" }));
    let (status, resp) = send_json(&api, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["success"], true);

    let req =
        TestRequest::post().uri("/payments/webhook/stripe").insert_header((SIGNATURE_HEADER, "good")).set_json(body);
    let (status, resp) = send_json(&api, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "completed");
    assert_eq!(resp["hint"], "unknown");

    let (status, _) = send(&api, TestRequest::post().uri("/payments/webhook/flutterwave").set_payload("{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn buyer_cancel() {
    let mut calls = MockProviderCalls::new();
    accept_sessions(&mut calls);
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let session = api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let uri = format!("/payments/{}/cancel", session.payment.payment_id);

    let (status, body) = send_json(&api, TestRequest::post().uri(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["failure_reason"], "Cancelled by the buyer");

    let (status, body) = send(&api, TestRequest::post().uri(&uri)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.contains("already finalized (cancelled)"), "was: {body}");

    // The order can be paid for again
    let (status, _) = send(&api, open_payment_request(order.order_id.as_str(), "stripe")).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[actix_web::test]
async fn payment_summary_and_audit_trail() {
    let mut calls = MockProviderCalls::new();
    accept_sessions(&mut calls);
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let session = api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let payment_id = session.payment.payment_id.clone();

    let (status, body) = send_json(&api, TestRequest::get().uri(&format!("/payments/{payment_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount"], "64.99");
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["provider"], "stripe");
    assert!(body.get("failure_reason").is_none());

    let (status, _) = send(&api, TestRequest::get().uri("/payments/pay_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for status in [PaymentStatus::Completed, PaymentStatus::Disputed] {
        let report = ProviderStatus::new(status, status.as_str()).with_amount(order.total_price, "USD");
        api.settle(SettlementEvent::new(payment_id.clone(), report, PaymentEventSource::Webhook)).await.unwrap();
    }
    let uri = format!("/payments/{payment_id}/refund");

    let req = TestRequest::post().uri(&uri).set_json(json!({ "reason": "Goods never arrived" }));
    let (status, _) = send(&api, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = admin(TestRequest::post().uri(&uri).set_json(json!({ "reason": "Goods never arrived" })));
    let (status, body) = send_json(&api, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refunded");

    let (status, body) = send_json(&api, TestRequest::get().uri(&format!("/payments/{payment_id}/events"))).await;
    assert_eq!(status, StatusCode::OK);
    let events = body.as_array().unwrap();
    let trail = events
        .iter()
        .map(|e| (e["new_status"].as_str().unwrap(), e["source"].as_str().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(trail, vec![("completed", "webhook"), ("disputed", "webhook"), ("refunded", "admin")]);
    assert_eq!(events[2]["note"], "Goods never arrived");
}

#[actix_web::test]
async fn refund_requires_a_dispute() {
    let mut calls = MockProviderCalls::new();
    accept_sessions(&mut calls);
    let api = test_api(calls).await;
    let order = create_order(&api).await;
    let session = api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let uri = format!("/payments/{}/refund", session.payment.payment_id);
    let req = admin(TestRequest::post().uri(&uri).set_json(json!({ "reason": "Changed my mind" })));
    let (status, body) = send(&api, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.contains("is final"), "was: {body}");
}
