use opg_common::MoneyError;
use serde::Serialize;
use thiserror::Error;

use crate::{
    db_types::{OrderId, OrderStatusType, OrderValidationError, PaymentId, PaymentStatus, ProviderCode, TerminalStateError},
    traits::{CartServiceError, PaymentGatewayError, ProviderError},
};

/// The error classes callers need to tell apart, regardless of the specific error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Rejected synchronously and never retried automatically.
    Validation,
    /// The provider refused. The caller may retry, possibly with another provider.
    ProviderRejected,
    /// The provider's answer is unknown. State is left for reconciliation.
    ProviderTimeout,
    /// A business rule forbids the operation in the current state.
    Invariant,
    /// The referenced entity does not exist.
    NotFound,
    /// A callback could not be matched to any payment. Needs manual investigation.
    Reconciliation,
    Internal,
}

#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("Cannot create an order from an empty cart")]
    EmptyCart,
    #[error("Invalid address. {0}")]
    InvalidAddress(String),
    #[error("Invalid order. {0}")]
    InvalidOrder(String),
    #[error("Payment provider {0} is not supported")]
    UnsupportedProvider(String),
    #[error("{0}")]
    Money(#[from] MoneyError),
    #[error("{0}")]
    ProviderRejected(String),
    /// No verdict from the provider: a timeout, a transport failure, a server error or an unreadable answer
    #[error("{0}")]
    ProviderTimeout(String),
    #[error("Order {0} already has a payment in progress")]
    ActivePaymentExists(OrderId),
    #[error("Order {order_id} cannot move from {from} to {to}")]
    IllegalTransition { order_id: OrderId, from: OrderStatusType, to: OrderStatusType },
    #[error("Order {order_id} is {status} and cannot be paid for")]
    OrderNotPayable { order_id: OrderId, status: OrderStatusType },
    #[error("Payment {payment_id} is final. {source}")]
    ImmutableTerminalState { payment_id: PaymentId, source: TerminalStateError },
    #[error("Payment {payment_id} is already finalized ({status}) and can no longer be cancelled")]
    CannotCancel { payment_id: PaymentId, status: PaymentStatus },
    #[error("No {provider} payment matches the reference {reference}")]
    UnknownReference { provider: ProviderCode, reference: String },
    #[error("The {0} callback did not identify a payment")]
    MissingReference(ProviderCode),
    #[error("The webhook signature is missing or invalid")]
    InvalidSignature,
    #[error("The webhook event is not relevant to payment status. {0}")]
    IgnoredEvent(String),
    #[error("No cart found for {0}")]
    CartNotFound(String),
    #[error("Cart service error. {0}")]
    CartService(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("Payment {0} does not exist")]
    PaymentNotFound(PaymentId),
    #[error("The payment could not be settled because it kept changing concurrently")]
    Contention,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        use OrchestratorError::*;
        match self {
            EmptyCart | InvalidAddress(_) | InvalidOrder(_) | UnsupportedProvider(_) | Money(_) | MissingReference(_) => {
                ErrorKind::Validation
            },
            InvalidSignature | IgnoredEvent(_) => ErrorKind::Validation,
            ProviderRejected(_) => ErrorKind::ProviderRejected,
            ProviderTimeout(_) => ErrorKind::ProviderTimeout,
            ActivePaymentExists(_) |
            IllegalTransition { .. } |
            OrderNotPayable { .. } |
            ImmutableTerminalState { .. } |
            CannotCancel { .. } => ErrorKind::Invariant,
            OrderNotFound(_) | PaymentNotFound(_) | CartNotFound(_) => ErrorKind::NotFound,
            UnknownReference { .. } => ErrorKind::Reconciliation,
            CartService(_) | Contention | DatabaseError(_) => ErrorKind::Internal,
        }
    }
}

impl From<PaymentGatewayError> for OrchestratorError {
    fn from(e: PaymentGatewayError) -> Self {
        match e {
            PaymentGatewayError::ActivePaymentExists(id) => Self::ActivePaymentExists(id),
            PaymentGatewayError::OrderNotFound(id) => Self::OrderNotFound(id),
            PaymentGatewayError::PaymentNotFound(id) => Self::PaymentNotFound(id),
            PaymentGatewayError::InvalidOrder(e) => e.into(),
            e => Self::DatabaseError(e.to_string()),
        }
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(e: ProviderError) -> Self {
        match e {
            e if e.is_ambiguous() => Self::ProviderTimeout(e.to_string()),
            ProviderError::Rejected { .. } => Self::ProviderRejected(e.to_string()),
            ProviderError::MissingReference { provider } => Self::MissingReference(provider),
            ProviderError::InvalidSignature(_) => Self::InvalidSignature,
            ProviderError::UnsupportedEvent { .. } => Self::IgnoredEvent(e.to_string()),
            ProviderError::Amount(m) => Self::Money(m),
            ProviderError::Timeout(_) | ProviderError::MalformedResponse { .. } | ProviderError::Transport { .. } => {
                Self::ProviderTimeout(e.to_string())
            },
        }
    }
}

impl From<OrderValidationError> for OrchestratorError {
    fn from(e: OrderValidationError) -> Self {
        match e {
            OrderValidationError::EmptyCart => Self::EmptyCart,
            OrderValidationError::InvalidAddress(..) => Self::InvalidAddress(e.to_string()),
            OrderValidationError::InvalidLineItem(_) | OrderValidationError::InvalidAmount(_) => {
                Self::InvalidOrder(e.to_string())
            },
        }
    }
}

impl From<CartServiceError> for OrchestratorError {
    fn from(e: CartServiceError) -> Self {
        match e {
            CartServiceError::CartNotFound(user_ref) => Self::CartNotFound(user_ref),
            CartServiceError::Unavailable(_) => Self::CartService(e.to_string()),
        }
    }
}
