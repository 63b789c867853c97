use std::sync::Arc;

use opg_common::Money;
use order_payment_engine::{
    db_types::{Address, LineItem, NewOrder, Order, ProviderCode},
    events::EventProducers,
    traits::ProviderRegistry,
    OrderFlowApi,
    SqliteDatabase,
};
use rust_decimal_macros::dec;

use super::stub_provider::StubProvider;

pub struct TestEnv {
    pub api: OrderFlowApi<SqliteDatabase>,
    pub stripe: Arc<StubProvider>,
    pub paystack: Arc<StubProvider>,
}

pub async fn prepare_test_env() -> SqliteDatabase {
    let _ = env_logger::try_init();
    SqliteDatabase::new_in_memory().await.expect("Error creating in-memory database")
}

/// An orchestrator backed by a fresh in-memory database, with two stub providers registered.
pub async fn setup() -> TestEnv {
    setup_with(StubProvider::new(ProviderCode::Stripe), EventProducers::default()).await
}

pub async fn setup_with(stripe: StubProvider, producers: EventProducers) -> TestEnv {
    let db = prepare_test_env().await;
    let stripe = Arc::new(stripe);
    let paystack = Arc::new(StubProvider::new(ProviderCode::Paystack));
    let providers = ProviderRegistry::new().with_adapter(stripe.clone()).with_adapter(paystack.clone());
    let api = OrderFlowApi::new(db, providers, producers);
    TestEnv { api, stripe, paystack }
}

pub fn address() -> Address {
    Address {
        recipient: "Ada Obi".into(),
        line1: "12 Marina Road".into(),
        city: "Lagos".into(),
        postal_code: "101001".into(),
        country: "NG".into(),
        email: Some("ada@example.com".into()),
        ..Default::default()
    }
}

/// Two items ($20 x 2, $15 x 1) plus $9.99 shipping.
pub fn scenario_a_order() -> NewOrder {
    NewOrder::new(
        vec![LineItem::new("sku-shirt", 2, Money::from(dec!(20))), LineItem::new("sku-cap", 1, Money::from(dec!(15)))],
        address(),
        address(),
        Money::from(dec!(9.99)),
    )
}

pub async fn new_order(env: &TestEnv) -> Order {
    env.api.create_order(scenario_a_order()).await.expect("Error creating order")
}
