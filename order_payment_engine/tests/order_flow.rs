use std::sync::Arc;

use opg_common::Money;
use order_payment_engine::{
    db_types::{Address, LineItem, NewOrder, OrderId, OrderStatusType, PaymentStatus, ProviderCode},
    traits::{CartService, CartServiceError, CartTotals, PaymentGatewayDatabase, ProviderError},
    ErrorKind,
    OrchestratorError,
};
use rust_decimal_macros::dec;

use crate::support::{
    prepare_env::{address, new_order, scenario_a_order, setup},
    stub_provider::StubProvider,
};

mod support;

#[tokio::test]
async fn order_total_is_frozen_at_creation() {
    let env = setup().await;
    let order = new_order(&env).await;
    assert_eq!(order.total_price, Money::from(dec!(64.99)));
    assert_eq!(order.status, OrderStatusType::Pending);
    assert_eq!(order.line_items.len(), 2);
    let stored = env.api.fetch_order(&order.order_id).await.unwrap();
    assert_eq!(stored.total_price, Money::from(dec!(64.99)));
    assert_eq!(stored.shipping_address, address());
}

#[tokio::test]
async fn order_validation_errors() {
    let env = setup().await;
    let empty = NewOrder::new(vec![], address(), address(), Money::zero());
    let err = env.api.create_order(empty).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::EmptyCart));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut bad = address();
    bad.postal_code = String::new();
    let order = NewOrder::new(vec![LineItem::new("sku", 1, Money::from(dec!(1)))], bad, address(), Money::zero());
    let err = env.api.create_order(order).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidAddress(_)), "{err}");

    let price = Money::from(dec!(50000000000000000000000000000));
    let order = NewOrder::new(vec![LineItem::new("sku", 2, price)], address(), address(), Money::zero());
    let err = env.api.create_order(order).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidOrder(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn open_session_records_a_pending_payment() {
    let env = setup().await;
    let order = new_order(&env).await;
    let session = env.api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    assert_eq!(session.payment.status, PaymentStatus::Pending);
    assert_eq!(session.payment.amount, order.total_price);
    assert_eq!(session.suggested_provider, None);
    let reference = session.payment.external_reference.clone().unwrap();
    assert_eq!(session.checkout_url, format!("https://checkout.test/{reference}"));
    // Minor-unit providers receive cents
    assert_eq!(env.stripe.wire_amount(&reference), Some(dec!(6499)));
    let request = &env.stripe.sessions()[0];
    assert_eq!(request.customer_email.as_deref(), Some("ada@example.com"));
    assert!(request.return_urls.success_url.ends_with("/payments/return?provider=stripe"));
}

#[tokio::test]
async fn unsupported_provider() {
    let env = setup().await;
    let order = new_order(&env).await;
    let err = env.api.open_session(&order.order_id, ProviderCode::Flutterwave).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnsupportedProvider(_)));
    assert!(env.api.fetch_order_with_payments(&order.order_id).await.unwrap().payments.is_empty());
}

#[tokio::test]
async fn open_session_for_missing_order() {
    let env = setup().await;
    let err = env.api.open_session(&OrderId::from("ord_nope".to_string()), ProviderCode::Stripe).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::OrderNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn second_session_while_one_is_active() {
    let env = setup().await;
    let order = new_order(&env).await;
    env.api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let err = env.api.open_session(&order.order_id, ProviderCode::Paystack).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ActivePaymentExists(_)));
    assert_eq!(err.kind(), ErrorKind::Invariant);
}

#[tokio::test]
async fn concurrent_open_sessions_yield_exactly_one_payment() {
    let stripe = StubProvider::new(ProviderCode::Stripe).with_session_delay(std::time::Duration::from_millis(50));
    let env = support::prepare_env::setup_with(stripe, Default::default()).await;
    let order = new_order(&env).await;
    let (a, b) = tokio::join!(
        env.api.open_session(&order.order_id, ProviderCode::Stripe),
        env.api.open_session(&order.order_id, ProviderCode::Stripe)
    );
    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        (a, b) => panic!("Expected exactly one success, got {a:?} and {b:?}"),
    };
    assert!(matches!(err, OrchestratorError::ActivePaymentExists(_)));
    let payments = env.api.db().fetch_payments_for_order(&order.order_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].payment_id, ok.payment.payment_id);
    assert_eq!(env.stripe.sessions().len(), 1);
}

#[tokio::test]
async fn provider_rejection_fails_the_attempt() {
    let env = setup().await;
    let order = new_order(&env).await;
    env.stripe.reject_next_session("Invalid API key");
    let err = env.api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ProviderRejected(ref m) if m.contains("Invalid API key")), "{err}");
    assert_eq!(err.kind(), ErrorKind::ProviderRejected);
    let history = env.api.fetch_order_with_payments(&order.order_id).await.unwrap();
    assert_eq!(history.payments.len(), 1);
    assert_eq!(history.payments[0].status, PaymentStatus::Failed);
    assert!(history.payments[0].failure_reason.as_deref().unwrap().contains("Invalid API key"));
    // A new attempt is allowed straight away
    assert!(env.api.open_session(&order.order_id, ProviderCode::Stripe).await.is_ok());
}

#[tokio::test]
async fn provider_timeout_leaves_the_attempt_pending() {
    let env = setup().await;
    let order = new_order(&env).await;
    env.stripe.fail_next_session(ProviderError::Timeout(ProviderCode::Stripe));
    let err = env.api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderTimeout);
    let history = env.api.fetch_order_with_payments(&order.order_id).await.unwrap();
    let current = history.current_payment.unwrap();
    assert_eq!(current.status, PaymentStatus::Pending);
    assert!(current.external_reference.is_none());
    assert!(env.api.db().fetch_retry_counters(&order.order_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn amounts_that_cannot_be_expressed_in_minor_units_are_refused() {
    let env = setup().await;
    let order = NewOrder::new(
        vec![LineItem::new("sku-bolt", 1, Money::from(dec!(0.005)))],
        address(),
        address(),
        Money::zero(),
    );
    let order = env.api.create_order(order).await.unwrap();
    let err = env.api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Money(_)), "{err}");
    assert!(env.stripe.sessions().is_empty());
}

#[tokio::test]
async fn buyer_cancel() {
    let env = setup().await;
    let order = new_order(&env).await;
    let session = env.api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap();
    let reference = session.payment.external_reference.clone().unwrap();
    let cancelled = env.api.cancel_payment(&session.payment.payment_id).await.unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);
    assert_eq!(env.stripe.expired(), vec![reference]);
    // Cancelling again is refused with a clear message
    let err = env.api.cancel_payment(&session.payment.payment_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CannotCancel { status: PaymentStatus::Cancelled, .. }));
    assert!(err.to_string().contains("already finalized"));
    // Buyer cancels do not count as failures
    assert!(env.api.db().fetch_retry_counters(&order.order_id).await.unwrap().is_empty());
    assert_eq!(env.api.fetch_order(&order.order_id).await.unwrap().status, OrderStatusType::Pending);
}

#[tokio::test]
async fn order_transitions() {
    let env = setup().await;
    let order = new_order(&env).await;
    let err = env.api.transition_order_status(&order.order_id, OrderStatusType::Processing).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalTransition { .. }));
    let err = env.api.transition_order_status(&order.order_id, OrderStatusType::Shipped).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalTransition { .. }));
    let cancelled = env.api.transition_order_status(&order.order_id, OrderStatusType::Cancelled).await.unwrap();
    assert_eq!(cancelled.status, OrderStatusType::Cancelled);
    assert_eq!(cancelled.total_price, order.total_price);
    let err = env.api.open_session(&order.order_id, ProviderCode::Stripe).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::OrderNotPayable { .. }));
}

struct FixedCart(Result<CartTotals, CartServiceError>);

#[async_trait::async_trait]
impl CartService for FixedCart {
    async fn get_cart_totals(&self, _user_ref: &str) -> Result<CartTotals, CartServiceError> {
        self.0.clone()
    }
}

#[tokio::test]
async fn orders_from_carts() {
    let env = setup().await;
    let line_items = scenario_a_order().line_items;
    let cart = FixedCart(Ok(CartTotals { line_items: line_items.clone(), subtotal: Money::from(dec!(55)) }));
    let order = env
        .api
        .create_order_from_cart(&cart, "user-42", address(), address(), Money::from(dec!(9.99)), "USD")
        .await
        .unwrap();
    assert_eq!(order.total_price, Money::from(dec!(64.99)));
    assert_eq!(order.customer_ref.as_deref(), Some("user-42"));

    let cart = FixedCart(Ok(CartTotals { line_items, subtotal: Money::from(dec!(50)) }));
    let err = env
        .api
        .create_order_from_cart(&cart, "user-42", address(), address(), Money::zero(), "USD")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidOrder(_)));

    // Lines too large to add up
    let huge = LineItem::new("sku-gold", 1, Money::from(dec!(50000000000000000000000000000)));
    let cart = FixedCart(Ok(CartTotals { line_items: vec![huge.clone(), huge], subtotal: Money::zero() }));
    let err = env
        .api
        .create_order_from_cart(&cart, "user-42", address(), address(), Money::zero(), "USD")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidOrder(_)), "{err}");

    let cart: Arc<dyn CartService> = Arc::new(FixedCart(Err(CartServiceError::CartNotFound("user-7".into()))));
    let err = env
        .api
        .create_order_from_cart(cart.as_ref(), "user-7", address(), Address::default(), Money::zero(), "USD")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
