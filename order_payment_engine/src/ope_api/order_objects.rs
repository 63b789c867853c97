use serde::{Deserialize, Serialize};

use crate::db_types::{Order, Payment, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChanged {
    pub old_order: Order,
    pub new_order: Order,
}

impl OrderChanged {
    pub fn new(old_order: Order, new_order: Order) -> Self {
        Self { old_order, new_order }
    }
}

/// An order together with its payment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWithPayments {
    pub order: Order,
    /// The pending attempt if there is one, otherwise the most recent attempt
    pub current_payment: Option<Payment>,
    /// Every attempt, most recent first
    pub payments: Vec<Payment>,
}

impl OrderWithPayments {
    pub fn new(order: Order, payments: Vec<Payment>) -> Self {
        let current_payment = current_payment(&payments).cloned();
        Self { order, current_payment, payments }
    }
}

/// Picks the "current" payment out of an order's history, which must be sorted most recent first: the most recent
/// non-terminal payment or, failing that, the most recent terminal one.
pub fn current_payment(payments: &[Payment]) -> Option<&Payment> {
    payments.iter().find(|p| p.status == PaymentStatus::Pending).or_else(|| payments.first())
}
