use std::fmt::Display;

use chrono::{DateTime, Utc};
use opg_common::Money;
use order_payment_engine::{
    db_types::{Address, LineItem, NewOrder, OrderId, OrderStatusType, Payment, PaymentId, PaymentStatus, ProviderCode},
    payment_objects::ResolvedCallback,
    traits::OutcomeHint,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }
}

/// The body of `POST /orders`. The currency defaults to the server's configured currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderRequest {
    #[serde(default)]
    pub customer_ref: Option<String>,
    pub line_items: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing_address: Address,
    #[serde(default)]
    pub shipping_cost: Money,
    #[serde(default)]
    pub currency: Option<String>,
}

impl NewOrderRequest {
    pub fn into_new_order(self, default_currency: &str) -> NewOrder {
        let currency = self.currency.unwrap_or_else(|| default_currency.to_string());
        let order = NewOrder::new(self.line_items, self.shipping_address, self.billing_address, self.shipping_cost)
            .with_currency(currency);
        match self.customer_ref {
            Some(customer_ref) => order.with_customer_ref(customer_ref),
            None => order,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub order_id: OrderId,
    pub provider: ProviderCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub status: OrderStatusType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

/// The buyer-facing view of a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub provider: ProviderCode,
    pub status: PaymentStatus,
    pub amount: Money,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<Payment> for PaymentSummary {
    fn from(p: Payment) -> Self {
        Self {
            payment_id: p.payment_id,
            order_id: p.order_id,
            provider: p.provider,
            status: p.status,
            amount: p.amount,
            currency: p.currency,
            failure_reason: p.failure_reason,
            checkout_url: p.checkout_url,
            paid_at: p.paid_at,
        }
    }
}

/// What the return and webhook endpoints report back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub status: PaymentStatus,
    /// What the return URL claimed. Advisory only.
    pub hint: OutcomeHint,
    /// False if the provider could not be reached and the status is still to be confirmed
    pub authoritative: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_provider: Option<ProviderCode>,
}

impl From<ResolvedCallback> for CallbackResponse {
    fn from(r: ResolvedCallback) -> Self {
        let authoritative = r.is_authoritative();
        Self {
            payment_id: r.payment.payment_id,
            order_id: r.payment.order_id,
            status: r.payment.status,
            hint: r.hint,
            authoritative,
            failure_reason: r.payment.failure_reason,
            suggested_provider: r.suggested_provider,
        }
    }
}
