use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderStatusType, Payment, PaymentEventSource, PaymentStatus};

/// Emitted whenever an order moves to a new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChangedEvent {
    pub order: Order,
    pub old_status: OrderStatusType,
}

impl OrderStatusChangedEvent {
    pub fn new(old_status: OrderStatusType, order: Order) -> Self {
        Self { order, old_status }
    }
}

/// Emitted whenever a payment status change has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusChangedEvent {
    pub payment: Payment,
    pub old_status: PaymentStatus,
    pub source: PaymentEventSource,
}

impl PaymentStatusChangedEvent {
    pub fn new(old_status: PaymentStatus, payment: Payment, source: PaymentEventSource) -> Self {
        Self { payment, old_status, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The provider completed a payment for an order that is no longer awaiting payment.
    OrderNotPending,
    /// The provider reported a different amount or currency than was requested.
    AmountMismatch,
    /// The provider reported a status that cannot follow the payment's final status.
    TerminalStateViolation,
}

/// The provider and the local records disagree in a way that needs a human to sort out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConflictEvent {
    pub kind: ConflictKind,
    pub payment: Payment,
    pub order: Option<Order>,
    pub reported_status: PaymentStatus,
    pub detail: String,
}

impl PaymentConflictEvent {
    pub fn new<S: Into<String>>(kind: ConflictKind, payment: Payment, reported_status: PaymentStatus, detail: S) -> Self {
        Self { kind, payment, order: None, reported_status, detail: detail.into() }
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }
}
