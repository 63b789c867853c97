use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, OrderStatusType, Payment, PaymentEventSource, PaymentId, PaymentStatus},
    order_objects::OrderChanged,
};

/// What to do with the consecutive-failure counters of the payment's order when a status change is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryCounterAction {
    #[default]
    Unchanged,
    /// Increment the counter of the payment's provider and reset every other provider's counter for the order.
    RecordFailure,
    /// Clear every counter for the order.
    Reset,
}

/// A single, atomic payment status change.
///
/// The change is only applied if the payment still has `expected_status`. If `order_transition` is set, the order
/// must likewise still be in the `from` state, and is moved to the `to` state in the same transaction.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub payment_id: PaymentId,
    pub expected_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub source: PaymentEventSource,
    pub provider_status: Option<String>,
    pub note: Option<String>,
    pub order_transition: Option<(OrderStatusType, OrderStatusType)>,
    pub retry_counters: RetryCounterAction,
}

impl PaymentUpdate {
    pub fn new(payment: &Payment, new_status: PaymentStatus, source: PaymentEventSource) -> Self {
        Self {
            payment_id: payment.payment_id.clone(),
            expected_status: payment.status,
            new_status,
            failure_reason: None,
            source,
            provider_status: None,
            note: None,
            order_transition: None,
            retry_counters: RetryCounterAction::Unchanged,
        }
    }

    pub fn with_failure_reason<S: Into<String>>(mut self, reason: Option<S>) -> Self {
        self.failure_reason = reason.map(Into::into);
        self
    }

    pub fn with_provider_status<S: Into<String>>(mut self, status: S) -> Self {
        self.provider_status = Some(status.into());
        self
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_order_transition(mut self, from: OrderStatusType, to: OrderStatusType) -> Self {
        self.order_transition = Some((from, to));
        self
    }

    pub fn with_retry_counters(mut self, action: RetryCounterAction) -> Self {
        self.retry_counters = action;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentUpdateResult {
    pub old_status: PaymentStatus,
    pub payment: Payment,
    /// Present if the update also moved the order
    pub order: Option<OrderChanged>,
}

impl PaymentUpdateResult {
    pub fn new(old_status: PaymentStatus, payment: Payment, order: Option<(Order, Order)>) -> Self {
        let order = order.map(|(old, new)| OrderChanged::new(old, new));
        Self { old_status, payment, order }
    }
}
