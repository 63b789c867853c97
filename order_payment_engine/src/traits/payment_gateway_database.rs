use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{
        NewOrder,
        NewPayment,
        Order,
        OrderId,
        OrderStatusType,
        OrderValidationError,
        Payment,
        PaymentEvent,
        PaymentId,
        PaymentStatus,
        ProviderCode,
        RetryCounter,
    },
    order_objects::OrderChanged,
    traits::data_objects::{PaymentUpdate, PaymentUpdateResult},
};

/// This trait defines the storage behaviour required by the order/payment orchestrator.
///
/// Backends are expected to provide the following guarantees:
/// * At most one payment per order has the `pending` status. Attempting to store a second one must fail with
///   [`PaymentGatewayError::ActivePaymentExists`], even if the orchestrator's own locking has been bypassed.
/// * Status writes are compare-and-set. If the stored status differs from the expected one, nothing is written and a
///   `*StatusChanged` error carrying the actual status is returned.
/// * [`PaymentGatewayDatabase::apply_payment_update`] is atomic: the payment, the optional order transition, the
///   retry counters and the audit trail entry are written together or not at all.
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a new order in the `pending` state, with its total price frozen.
    async fn insert_order(&self, order_id: OrderId, order: NewOrder) -> Result<Order, PaymentGatewayError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError>;

    /// Moves the order from `from` to `to`, provided it is still in the `from` state.
    /// The transition table itself is checked by the caller.
    async fn update_order_status(
        &self,
        order_id: &OrderId,
        from: OrderStatusType,
        to: OrderStatusType,
    ) -> Result<OrderChanged, PaymentGatewayError>;

    /// Reserves a new `pending` payment attempt. No external reference is attached yet.
    async fn insert_pending_payment(&self, payment: NewPayment) -> Result<Payment, PaymentGatewayError>;

    /// Records the provider session details against a payment that is still `pending`.
    async fn attach_session(
        &self,
        payment_id: &PaymentId,
        external_reference: &str,
        checkout_url: Option<&str>,
    ) -> Result<Payment, PaymentGatewayError>;

    async fn fetch_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>, PaymentGatewayError>;

    /// Looks a payment up by the reference its provider assigned to it.
    async fn fetch_payment_by_reference(
        &self,
        provider: ProviderCode,
        external_reference: &str,
    ) -> Result<Option<Payment>, PaymentGatewayError>;

    /// All payment attempts for the order, most recent first.
    async fn fetch_payments_for_order(&self, order_id: &OrderId) -> Result<Vec<Payment>, PaymentGatewayError>;

    /// Up to `limit` pending payments created before `created_before`, marking each as checked at `checked_at`.
    ///
    /// Payments that were never checked are returned first, then the least recently checked ones, so that repeated
    /// calls work through the whole backlog even when some payments stay pending indefinitely.
    async fn claim_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        checked_at: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, PaymentGatewayError>;

    /// Applies a payment status change, and any order status change and retry counter bookkeeping that goes with it,
    /// in a single atomic transaction.
    async fn apply_payment_update(&self, update: PaymentUpdate) -> Result<PaymentUpdateResult, PaymentGatewayError>;

    async fn fetch_retry_counters(&self, order_id: &OrderId) -> Result<Vec<RetryCounter>, PaymentGatewayError>;

    /// The audit trail for the payment, oldest first.
    async fn fetch_payment_events(&self, payment_id: &PaymentId) -> Result<Vec<PaymentEvent>, PaymentGatewayError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("Stored data could not be decoded: {0}")]
    DataCorruption(String),
    #[error("Cannot insert order. {0}")]
    InvalidOrder(#[from] OrderValidationError),
    #[error("Cannot insert order, since it already exists with id {0}")]
    OrderAlreadyExists(OrderId),
    #[error("Order {0} already has a payment in progress")]
    ActivePaymentExists(OrderId),
    #[error("The provider reference {0} already belongs to another payment")]
    DuplicateReference(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested payment {0} does not exist")]
    PaymentNotFound(PaymentId),
    #[error("Order {order_id} was expected to be {expected}, but it is {actual}")]
    OrderStatusChanged { order_id: OrderId, expected: OrderStatusType, actual: OrderStatusType },
    #[error("Payment {payment_id} was expected to be {expected}, but it is {actual}")]
    PaymentStatusChanged { payment_id: PaymentId, expected: PaymentStatus, actual: PaymentStatus },
}

impl PaymentGatewayError {
    /// True if a concurrent writer got there first. The caller should reload and re-evaluate.
    pub fn is_status_changed(&self) -> bool {
        matches!(self, Self::OrderStatusChanged { .. } | Self::PaymentStatusChanged { .. })
    }
}

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        PaymentGatewayError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for PaymentGatewayError {
    fn from(e: serde_json::Error) -> Self {
        PaymentGatewayError::DataCorruption(e.to_string())
    }
}
