use std::sync::Arc;

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web, web::ServiceConfig, App};
use log::debug;
use opg_common::Secret;
use order_payment_engine::{
    db_types::{Order, PaymentStatus, ProviderCode},
    events::EventProducers,
    traits::{ProviderRegistry, ProviderSession, ProviderStatus},
    CallbackResolver,
    OrderFlowApi,
    OrderFlowConfig,
    SqliteDatabase,
};
use serde_json::{json, Value};

use super::mocks::{MockProviderCalls, MockedProvider};
use crate::{config::RequestOptions, server::configure_routes};

pub const ADMIN_TOKEN: &str = "let-me-in";

pub async fn test_api(calls: MockProviderCalls) -> OrderFlowApi<SqliteDatabase> {
    let _ = env_logger::try_init();
    let db = SqliteDatabase::new_in_memory().await.expect("Error creating in-memory database");
    let registry = ProviderRegistry::new().with_adapter(Arc::new(MockedProvider::new(ProviderCode::Stripe, calls)));
    let config = OrderFlowConfig { public_url: "https://shop.example.com".into(), ..Default::default() };
    OrderFlowApi::new(db, registry, EventProducers::default()).with_config(config)
}

pub fn options() -> RequestOptions {
    RequestOptions { admin_token: Secret::new(ADMIN_TOKEN.to_string()), ..Default::default() }
}

fn configure(api: OrderFlowApi<SqliteDatabase>, options: RequestOptions) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let resolver = CallbackResolver::new(api.clone());
        cfg.app_data(web::Data::new(api)).app_data(web::Data::new(resolver)).app_data(web::Data::new(options));
        configure_routes::<SqliteDatabase>(cfg);
    }
}

/// Sends `req` to a fresh app instance sharing `api`, and returns the status and the raw body.
pub async fn send(api: &OrderFlowApi<SqliteDatabase>, req: TestRequest) -> (StatusCode, String) {
    let app = test::init_service(App::new().configure(configure(api.clone(), options()))).await;
    debug!("Making request");
    let (_, res) = test::call_service(&app, req.to_request()).await.into_parts();
    let status = res.status();
    let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
    (status, body)
}

/// Like [`send`], but parses the body as JSON.
pub async fn send_json(api: &OrderFlowApi<SqliteDatabase>, req: TestRequest) -> (StatusCode, Value) {
    let (status, body) = send(api, req).await;
    let value = serde_json::from_str(&body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"));
    (status, value)
}

/// Two items ($20 x 2, $15 x 1) plus $9.99 shipping.
pub fn order_json() -> Value {
    let address = json!({
        "recipient": "Ada Obi",
        "line1": "12 Marina Road",
        "city": "Lagos",
        "postal_code": "101001",
        "country": "NG",
        "email": "ada@example.com"
    });
    json!({
        "line_items": [
            { "product_ref": "sku-shirt", "quantity": 2, "unit_price": "20" },
            { "product_ref": "sku-cap", "quantity": 1, "unit_price": "15" }
        ],
        "shipping_address": address.clone(),
        "billing_address": address,
        "shipping_cost": "9.99"
    })
}

pub async fn create_order(api: &OrderFlowApi<SqliteDatabase>) -> Order {
    let (status, body) = send(api, TestRequest::post().uri("/orders").set_json(order_json())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    serde_json::from_str(&body).expect("Not an order")
}

/// Session creation always succeeds, with a reference derived from the payment id.
pub fn accept_sessions(calls: &mut MockProviderCalls) {
    calls.expect_create_session().returning(|req| {
        let reference = format!("cs_{}", req.payment_id);
        let checkout_url = format!("https://checkout.example.com/{reference}");
        Ok(ProviderSession { external_reference: reference, checkout_url })
    });
}

/// Every status check reports the session as paid in full.
pub fn report_paid(calls: &mut MockProviderCalls) {
    calls.expect_fetch_status().returning(|_| {
        let amount = "64.99".parse().expect("valid amount");
        Ok(ProviderStatus::new(PaymentStatus::Completed, "paid").with_amount(amount, "USD"))
    });
}

pub fn admin(req: TestRequest) -> TestRequest {
    req.insert_header(("Authorization", format!("Bearer {ADMIN_TOKEN}")))
}
