use std::fmt::Debug;

use log::*;
use opg_common::{to_provider_amount, Money};

use crate::{
    db_types::{
        line_items_subtotal,
        Address,
        NewOrder,
        NewPayment,
        Order,
        OrderId,
        OrderStatusType,
        Payment,
        PaymentEvent,
        PaymentEventSource,
        PaymentId,
        PaymentStatus,
        ProviderCode,
        StatusChange,
    },
    events::{
        ConflictKind,
        EventProducers,
        OrderStatusChangedEvent,
        PaymentConflictEvent,
        PaymentStatusChangedEvent,
    },
    helpers::OrderLocks,
    order_objects::OrderWithPayments,
    ope_api::{
        errors::OrchestratorError,
        payment_objects::{SessionOpened, SettlementEvent, SettlementOutcome, SettlementResult},
    },
    traits::{
        CartService,
        PaymentGatewayDatabase,
        PaymentUpdate,
        PaymentUpdateResult,
        ProviderRegistry,
        ProviderStatus,
        RetryCounterAction,
        ReturnUrls,
        SessionRequest,
    },
};

pub const DEFAULT_ALTERNATE_PROVIDER_THRESHOLD: i64 = 2;
pub const DEFAULT_SETTLE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct OrderFlowConfig {
    /// The externally reachable base URL of the server. Provider return URLs are built below it.
    pub public_url: String,
    /// Consecutive failures with one provider after which an alternate provider is suggested
    pub alternate_provider_threshold: i64,
    /// How often `settle` re-evaluates after losing a race before giving up
    pub max_settle_attempts: usize,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8360".to_string(),
            alternate_provider_threshold: DEFAULT_ALTERNATE_PROVIDER_THRESHOLD,
            max_settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
        }
    }
}

/// What `settle` decided to do with a provider finding.
enum SettlementPlan {
    Unchanged,
    Apply { update: PaymentUpdate, outcome: SettlementOutcome, conflict: Option<PaymentConflictEvent> },
}

/// `OrderFlowApi` is the payment orchestrator. It is the primary API for moving an order from cart to paid.
///
/// Every mutating operation on an order or its payments is serialized through a per-order lock, and every status
/// write is additionally compare-and-set in the database. Clones share the same locks, so a single instance (or
/// clones of it) must be used for all access to a given database.
#[derive(Clone)]
pub struct OrderFlowApi<B> {
    db: B,
    providers: ProviderRegistry,
    locks: OrderLocks,
    producers: EventProducers,
    config: OrderFlowConfig,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi ({:?})", self.providers)
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, providers: ProviderRegistry, producers: EventProducers) -> Self {
        Self { db, providers, locks: OrderLocks::new(), producers, config: OrderFlowConfig::default() }
    }

    pub fn with_config(mut self, config: OrderFlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn config(&self) -> &OrderFlowConfig {
        &self.config
    }
}

impl<B> OrderFlowApi<B>
where B: PaymentGatewayDatabase
{
    //------------------------------------------    Orders    ----------------------------------------------------------

    /// Creates a new order in the `pending` state. The total price is computed from the line items and shipping cost
    /// and is frozen from here on.
    pub async fn create_order(&self, order: NewOrder) -> Result<Order, OrchestratorError> {
        order.validate()?;
        let order = self.db.insert_order(OrderId::random(), order).await?;
        info!("📦️ Order {} created. Total: {} {}", order.order_id, order.total_price, order.currency);
        Ok(order)
    }

    /// Creates an order from the buyer's cart, as priced by the cart service at this moment.
    pub async fn create_order_from_cart<C: CartService + ?Sized>(
        &self,
        cart: &C,
        user_ref: &str,
        shipping_address: Address,
        billing_address: Address,
        shipping_cost: Money,
        currency: &str,
    ) -> Result<Order, OrchestratorError> {
        let totals = cart.get_cart_totals(user_ref).await?;
        if totals.line_items.is_empty() {
            return Err(OrchestratorError::EmptyCart);
        }
        if !totals.is_consistent() {
            let sum = line_items_subtotal(&totals.line_items)?;
            warn!("📦️ Cart for {user_ref} reports a subtotal of {} but its lines add up to {sum}", totals.subtotal);
            return Err(OrchestratorError::InvalidOrder(format!(
                "Cart subtotal {} does not match the line items ({sum})",
                totals.subtotal
            )));
        }
        let order = NewOrder::new(totals.line_items, shipping_address, billing_address, shipping_cost)
            .with_currency(currency)
            .with_customer_ref(user_ref);
        self.create_order(order).await
    }

    pub async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, OrchestratorError> {
        self.db.fetch_order(order_id).await?.ok_or_else(|| OrchestratorError::OrderNotFound(order_id.clone()))
    }

    pub async fn fetch_order_with_payments(&self, order_id: &OrderId) -> Result<OrderWithPayments, OrchestratorError> {
        let order = self.fetch_order(order_id).await?;
        let payments = self.db.fetch_payments_for_order(order_id).await?;
        Ok(OrderWithPayments::new(order, payments))
    }

    /// Moves an order along the fulfillment path (`processing -> shipped` and so on).
    ///
    /// `pending -> processing` is refused: an order only becomes `processing` when one of its payments completes.
    pub async fn transition_order_status(
        &self,
        order_id: &OrderId,
        target: OrderStatusType,
    ) -> Result<Order, OrchestratorError> {
        let _guard = self.locks.lock(order_id).await;
        let order = self.fetch_order(order_id).await?;
        let from = order.status;
        let payment_driven = from == OrderStatusType::Pending && target == OrderStatusType::Processing;
        if payment_driven || !from.can_transition_to(target) {
            debug!("📦️ Refusing to move order {order_id} from {from} to {target}");
            return Err(OrchestratorError::IllegalTransition { order_id: order_id.clone(), from, to: target });
        }
        let changed = self.db.update_order_status(order_id, from, target).await?;
        info!("📦️ Order {order_id} moved from {from} to {target}");
        self.producers
            .publish_order_status_changed(OrderStatusChangedEvent::new(from, changed.new_order.clone()))
            .await;
        Ok(changed.new_order)
    }

    //------------------------------------------   Payments   ----------------------------------------------------------

    /// Opens a checkout session for the order with the given provider.
    ///
    /// The check for an existing active payment and the reservation of the new one happen under the order's lock, and
    /// the database rejects a second pending payment regardless. The provider is only called once the reservation
    /// has succeeded.
    ///
    /// * A provider rejection marks the reserved attempt `failed`, counts towards the alternate-provider policy and is
    ///   returned as [`OrchestratorError::ProviderRejected`].
    /// * A timeout or an unintelligible answer leaves the attempt `pending` for the reconciliation poller.
    pub async fn open_session(
        &self,
        order_id: &OrderId,
        provider: ProviderCode,
    ) -> Result<SessionOpened, OrchestratorError> {
        let adapter =
            self.providers.get(provider).ok_or_else(|| OrchestratorError::UnsupportedProvider(provider.to_string()))?;
        let _guard = self.locks.lock(order_id).await;
        let order = self.fetch_order(order_id).await?;
        if order.status != OrderStatusType::Pending {
            return Err(OrchestratorError::OrderNotPayable { order_id: order_id.clone(), status: order.status });
        }
        let history = self.db.fetch_payments_for_order(order_id).await?;
        if history.iter().any(|p| !p.status.is_terminal()) {
            debug!("💳️ Order {order_id} already has a payment in progress");
            return Err(OrchestratorError::ActivePaymentExists(order_id.clone()));
        }
        to_provider_amount(order.total_price, &order.currency, adapter.amount_is_minor_units(&order.currency))?;
        let suggested_provider = self.suggested_alternate(order_id).await?;
        let payment = self.db.insert_pending_payment(NewPayment::for_order(&order, provider)).await?;
        let customer_email = order.billing_address.email.clone().or_else(|| order.shipping_address.email.clone());
        let request = SessionRequest {
            payment_id: payment.payment_id.clone(),
            order_id: order_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            return_urls: ReturnUrls::for_provider(&self.config.public_url, provider),
            customer_email,
        };
        match adapter.create_session(request).await {
            Ok(session) => {
                let payment = self
                    .db
                    .attach_session(&payment.payment_id, &session.external_reference, Some(&session.checkout_url))
                    .await?;
                info!(
                    "💳️ Payment {} opened with {provider} for order {order_id} ({} {}). Reference: {}",
                    payment.payment_id, payment.amount, payment.currency, session.external_reference
                );
                Ok(SessionOpened { payment, checkout_url: session.checkout_url, suggested_provider })
            },
            Err(e) if e.is_ambiguous() => {
                warn!(
                    "💳️ {provider} gave no verdict on payment {} for order {order_id}: {e}. The attempt stays pending \
                     for reconciliation.",
                    payment.payment_id
                );
                Err(e.into())
            },
            Err(e) => {
                warn!("💳️ {provider} refused payment {} for order {order_id}: {e}", payment.payment_id);
                let update = PaymentUpdate::new(&payment, PaymentStatus::Failed, PaymentEventSource::SessionSetup)
                    .with_failure_reason(Some(e.to_string()))
                    .with_retry_counters(RetryCounterAction::RecordFailure);
                let result = self.db.apply_payment_update(update).await?;
                self.publish_update(&result, PaymentEventSource::SessionSetup).await;
                Err(e.into())
            },
        }
    }

    /// A buyer-initiated cancel. Only a `pending` payment can be cancelled; anything else is already finalized.
    ///
    /// The provider is asked to expire the checkout session as well, on a best-effort basis.
    pub async fn cancel_payment(&self, payment_id: &PaymentId) -> Result<Payment, OrchestratorError> {
        let payment = self.fetch_payment(payment_id).await?;
        let _guard = self.locks.lock(&payment.order_id).await;
        let payment = self.fetch_payment(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(OrchestratorError::CannotCancel { payment_id: payment_id.clone(), status: payment.status });
        }
        let update = PaymentUpdate::new(&payment, PaymentStatus::Cancelled, PaymentEventSource::Buyer)
            .with_failure_reason(Some("Cancelled by the buyer"));
        let result = match self.db.apply_payment_update(update).await {
            Ok(r) => r,
            Err(e) if e.is_status_changed() => {
                let status = self.fetch_payment(payment_id).await?.status;
                return Err(OrchestratorError::CannotCancel { payment_id: payment_id.clone(), status });
            },
            Err(e) => return Err(e.into()),
        };
        info!("💳️ Payment {payment_id} cancelled by the buyer");
        self.publish_update(&result, PaymentEventSource::Buyer).await;
        if let (Some(reference), Some(adapter)) =
            (payment.external_reference.as_deref(), self.providers.get(payment.provider))
        {
            if let Err(e) = adapter.expire_session(reference).await {
                warn!("💳️ Could not expire {} session {reference} for payment {payment_id}: {e}", payment.provider);
            }
        }
        Ok(result.payment)
    }

    /// Resolves a dispute in the buyer's favour. This is the only way a `disputed` payment becomes `refunded`.
    pub async fn refund_disputed_payment(
        &self,
        payment_id: &PaymentId,
        reason: &str,
    ) -> Result<Payment, OrchestratorError> {
        let payment = self.fetch_payment(payment_id).await?;
        let _guard = self.locks.lock(&payment.order_id).await;
        let payment = self.fetch_payment(payment_id).await?;
        match payment.status.check_admin_refund() {
            Ok(StatusChange::NoOp) => Ok(payment),
            Ok(StatusChange::Apply) => {
                let update = PaymentUpdate::new(&payment, PaymentStatus::Refunded, PaymentEventSource::Admin)
                    .with_note(reason);
                let result = self.db.apply_payment_update(update).await?;
                info!("💳️ Disputed payment {payment_id} refunded. {reason}");
                self.publish_update(&result, PaymentEventSource::Admin).await;
                Ok(result.payment)
            },
            Err(source) => Err(OrchestratorError::ImmutableTerminalState { payment_id: payment_id.clone(), source }),
        }
    }

    pub async fn fetch_payment(&self, payment_id: &PaymentId) -> Result<Payment, OrchestratorError> {
        self.db.fetch_payment(payment_id).await?.ok_or_else(|| OrchestratorError::PaymentNotFound(payment_id.clone()))
    }

    pub async fn fetch_payment_events(&self, payment_id: &PaymentId) -> Result<Vec<PaymentEvent>, OrchestratorError> {
        self.fetch_payment(payment_id).await?;
        let events = self.db.fetch_payment_events(payment_id).await?;
        Ok(events)
    }

    /// If the order has failed at least `alternate_provider_threshold` times in a row with one provider, returns
    /// another configured provider to suggest to the buyer.
    pub async fn suggested_alternate(&self, order_id: &OrderId) -> Result<Option<ProviderCode>, OrchestratorError> {
        let counters = self.db.fetch_retry_counters(order_id).await?;
        let failing = counters
            .into_iter()
            .filter(|c| c.consecutive_failures >= self.config.alternate_provider_threshold)
            .max_by_key(|c| c.consecutive_failures)
            .map(|c| c.provider);
        let suggestion = failing.and_then(|p| self.providers.alternate_to(p));
        if let (Some(failing), Some(alternate)) = (failing, suggestion) {
            debug!("💳️ Order {order_id} keeps failing with {failing}. Suggesting {alternate} instead.");
        }
        Ok(suggestion)
    }

    //------------------------------------------  Settlement  ----------------------------------------------------------

    /// Reconciles an authoritative provider finding into the payment and its order.
    ///
    /// This is the single path through which return URLs, webhooks and the reconciliation poller change state. It is
    /// idempotent: a finding that the payment already reflects changes nothing and emits nothing. If a concurrent
    /// writer changes the payment or order between evaluation and write, the finding is re-evaluated against the
    /// fresh state.
    pub async fn settle(&self, event: SettlementEvent) -> Result<SettlementResult, OrchestratorError> {
        let payment = self.fetch_payment(&event.payment_id).await?;
        let _guard = self.locks.lock(&payment.order_id).await;
        for attempt in 1..=self.config.max_settle_attempts {
            let payment = self.fetch_payment(&event.payment_id).await?;
            let order = self.fetch_order(&payment.order_id).await?;
            let (update, outcome, conflict) = match self.plan_settlement(&payment, &order, &event).await? {
                SettlementPlan::Unchanged => {
                    trace!("💳️ Payment {} is already {}. Nothing to do.", payment.payment_id, payment.status);
                    return Ok(SettlementResult { outcome: SettlementOutcome::Unchanged, payment, order });
                },
                SettlementPlan::Apply { update, outcome, conflict } => (update, outcome, conflict),
            };
            match self.db.apply_payment_update(update).await {
                Ok(result) => {
                    info!(
                        "💳️ Payment {} settled: {} -> {} (via {})",
                        result.payment.payment_id, result.old_status, result.payment.status, event.source
                    );
                    self.publish_update(&result, event.source).await;
                    if let Some(conflict) = conflict {
                        self.producers.publish_payment_conflict(conflict).await;
                    }
                    let order = match result.order {
                        Some(changed) => changed.new_order,
                        None => order,
                    };
                    return Ok(SettlementResult { outcome, payment: result.payment, order });
                },
                Err(e) if e.is_status_changed() => {
                    debug!("💳️ Lost a race settling payment {} (attempt {attempt}): {e}", event.payment_id);
                },
                Err(e) => return Err(e.into()),
            }
        }
        error!("💳️ Giving up settling payment {} after repeated concurrent changes", event.payment_id);
        Err(OrchestratorError::Contention)
    }

    async fn plan_settlement(
        &self,
        payment: &Payment,
        order: &Order,
        event: &SettlementEvent,
    ) -> Result<SettlementPlan, OrchestratorError> {
        let reported = event.status.status;
        match payment.status.check_provider_transition(reported) {
            Ok(StatusChange::NoOp) => return Ok(SettlementPlan::Unchanged),
            Ok(StatusChange::Apply) => {},
            Err(source) => {
                let conflict = PaymentConflictEvent::new(
                    ConflictKind::TerminalStateViolation,
                    payment.clone(),
                    reported,
                    format!("{} reported {reported} ({})", payment.provider, event.status.raw_status),
                )
                .with_order(order.clone());
                self.producers.publish_payment_conflict(conflict).await;
                return Err(OrchestratorError::ImmutableTerminalState { payment_id: payment.payment_id.clone(), source });
            },
        }
        let base = PaymentUpdate::new(payment, reported, event.source).with_provider_status(&event.status.raw_status);
        let plan = match reported {
            PaymentStatus::Completed => {
                if let Some(mismatch) = amount_mismatch(payment, &event.status) {
                    let update = PaymentUpdate::new(payment, PaymentStatus::Failed, event.source)
                        .with_provider_status(&event.status.raw_status)
                        .with_failure_reason(Some(mismatch.clone()));
                    let conflict =
                        PaymentConflictEvent::new(ConflictKind::AmountMismatch, payment.clone(), reported, mismatch)
                            .with_order(order.clone());
                    SettlementPlan::Apply { update, outcome: SettlementOutcome::Conflict, conflict: Some(conflict) }
                } else if order.status == OrderStatusType::Pending {
                    let update = base
                        .with_order_transition(OrderStatusType::Pending, OrderStatusType::Processing)
                        .with_retry_counters(RetryCounterAction::Reset);
                    SettlementPlan::Apply { update, outcome: SettlementOutcome::Applied, conflict: None }
                } else {
                    let detail =
                        format!("Payment completed, but order {} is {}. The order was left as is.", order.order_id, order.status);
                    let conflict =
                        PaymentConflictEvent::new(ConflictKind::OrderNotPending, payment.clone(), reported, detail)
                            .with_order(order.clone());
                    let update = base.with_retry_counters(RetryCounterAction::Reset);
                    SettlementPlan::Apply { update, outcome: SettlementOutcome::Conflict, conflict: Some(conflict) }
                }
            },
            PaymentStatus::Failed => {
                let reason = event.status.failure_reason.clone().unwrap_or_else(|| "Payment failed at the provider".into());
                let update = base.with_failure_reason(Some(reason)).with_retry_counters(RetryCounterAction::RecordFailure);
                SettlementPlan::Apply { update, outcome: SettlementOutcome::Applied, conflict: None }
            },
            PaymentStatus::Cancelled | PaymentStatus::Refunded | PaymentStatus::Disputed => {
                let update = base.with_failure_reason(event.status.failure_reason.clone());
                SettlementPlan::Apply { update, outcome: SettlementOutcome::Applied, conflict: None }
            },
            PaymentStatus::Pending => SettlementPlan::Unchanged,
        };
        Ok(plan)
    }

    async fn publish_update(&self, result: &PaymentUpdateResult, source: PaymentEventSource) {
        let event = PaymentStatusChangedEvent::new(result.old_status, result.payment.clone(), source);
        self.producers.publish_payment_status_changed(event).await;
        if let Some(changed) = &result.order {
            info!(
                "📦️ Order {} moved from {} to {}",
                changed.new_order.order_id, changed.old_order.status, changed.new_order.status
            );
            let event = OrderStatusChangedEvent::new(changed.old_order.status, changed.new_order.clone());
            self.producers.publish_order_status_changed(event).await;
        }
    }
}

/// Describes how the provider's reported amount or currency differs from what was requested, if it does.
fn amount_mismatch(payment: &Payment, status: &ProviderStatus) -> Option<String> {
    let amount_differs = status.amount.is_some_and(|a| a != payment.amount);
    let currency_differs = status.currency.as_deref().is_some_and(|c| !c.eq_ignore_ascii_case(&payment.currency));
    (amount_differs || currency_differs).then(|| {
        format!(
            "Amount mismatch: expected {} {}, provider reported {} {}",
            payment.amount,
            payment.currency,
            status.amount.map(|a| a.to_string()).unwrap_or_else(|| "?".into()),
            status.currency.as_deref().unwrap_or("?")
        )
    })
}
