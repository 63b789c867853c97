use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use opg_common::{Money, DEFAULT_CURRENCY_CODE};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(pub String);

fn random_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    format!("{prefix}_{:016x}", rng.gen::<u64>())
}

//--------------------------------------        OrderId        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn random() -> Self {
        Self(random_id("ord"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderId {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConversionError("Order ids cannot be empty".into()));
        }
        Ok(Self(s.trim().to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------       PaymentId       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct PaymentId(pub String);

impl PaymentId {
    pub fn random() -> Self {
        Self(random_id("pay"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PaymentId {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConversionError("Payment ids cannot be empty".into()));
        }
        Ok(Self(s.trim().to_string()))
    }
}

impl From<String> for PaymentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------     ProviderCode      ---------------------------------------------------------
/// The payment providers the engine knows how to talk to. Whether a provider is actually available at runtime depends
/// on which adapters have been registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderCode {
    Stripe,
    Paystack,
    Flutterwave,
}

impl ProviderCode {
    pub const ALL: [ProviderCode; 3] = [ProviderCode::Stripe, ProviderCode::Paystack, ProviderCode::Flutterwave];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderCode::Stripe => "stripe",
            ProviderCode::Paystack => "paystack",
            ProviderCode::Flutterwave => "flutterwave",
        }
    }
}

impl Display for ProviderCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderCode {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Self::Stripe),
            "paystack" => Ok(Self::Paystack),
            "flutterwave" => Ok(Self::Flutterwave),
            s => Err(ConversionError(format!("Unknown payment provider: {s}"))),
        }
    }
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// The order has been created and is awaiting payment.
    Pending,
    /// A payment for the order has completed. The order is ready for fulfillment.
    Processing,
    /// The order has been handed to the carrier.
    Shipped,
    /// The order reached the buyer.
    Delivered,
    /// The order was cancelled before fulfillment.
    Cancelled,
    /// The buyer sent the goods back.
    Returned,
    /// Fulfillment has been paused.
    OnHold,
}

impl OrderStatusType {
    /// The order status transition table. Anything not listed here is illegal.
    ///
    /// | From       | Allowed To                       |
    /// |------------|----------------------------------|
    /// | Pending    | Processing, Cancelled            |
    /// | Processing | Shipped, OnHold, Cancelled       |
    /// | Shipped    | Delivered, Returned              |
    /// | Delivered  | Returned                         |
    /// | OnHold     | Processing, Cancelled            |
    /// | Cancelled  | -                                |
    /// | Returned   | -                                |
    pub fn allowed_transitions(&self) -> &'static [OrderStatusType] {
        use OrderStatusType::*;
        match self {
            Pending => &[Processing, Cancelled],
            Processing => &[Shipped, OnHold, Cancelled],
            Shipped => &[Delivered, Returned],
            Delivered => &[Returned],
            OnHold => &[Processing, Cancelled],
            Cancelled | Returned => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatusType) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatusType::Pending => "pending",
            OrderStatusType::Processing => "processing",
            OrderStatusType::Shipped => "shipped",
            OrderStatusType::Delivered => "delivered",
            OrderStatusType::Cancelled => "cancelled",
            OrderStatusType::Returned => "returned",
            OrderStatusType::OnHold => "on_hold",
        }
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            "returned" => Ok(Self::Returned),
            "on_hold" => Ok(Self::OnHold),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------     PaymentStatus     ---------------------------------------------------------
/// The canonical, provider-agnostic payment status vocabulary. Every provider adapter maps its own states into these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
    Disputed,
}

/// What applying a provider-reported status to a payment amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The payment already has this status. Replays land here.
    NoOp,
    /// The payment moves to the new status.
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Payment status {from} is final and cannot change to {to}")]
pub struct TerminalStateError {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

impl PaymentStatus {
    /// Only `Pending` is non-terminal. A terminal payment attempt never becomes pending again; a new attempt is a new
    /// payment.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Decides whether a provider-reported status may be applied to a payment currently in `self`.
    ///
    /// * Re-applying the current status is a no-op, never an error.
    /// * `Pending` may move to any status.
    /// * `Completed` may move to `Refunded` or `Disputed`. The order is not touched by either.
    /// * Every other move away from a terminal status is rejected. In particular `Disputed -> Refunded` is an
    ///   administrative action (see [`PaymentStatus::check_admin_refund`]) and never follows from a provider report.
    pub fn check_provider_transition(self, to: PaymentStatus) -> Result<StatusChange, TerminalStateError> {
        use PaymentStatus::*;
        match (self, to) {
            (from, to) if from == to => Ok(StatusChange::NoOp),
            (Pending, _) => Ok(StatusChange::Apply),
            (Completed, Refunded | Disputed) => Ok(StatusChange::Apply),
            (from, to) => Err(TerminalStateError { from, to }),
        }
    }

    /// The administrative resolution of a dispute in the buyer's favour.
    pub fn check_admin_refund(self) -> Result<StatusChange, TerminalStateError> {
        match self {
            PaymentStatus::Disputed => Ok(StatusChange::Apply),
            PaymentStatus::Refunded => Ok(StatusChange::NoOp),
            from => Err(TerminalStateError { from, to: PaymentStatus::Refunded }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Disputed => "disputed",
        }
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            "disputed" => Ok(Self::Disputed),
            s => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------       LineItem        ---------------------------------------------------------
/// A single cart line. Prices are captured when the order is created and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_ref: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    pub fn new<S: Into<String>>(product_ref: S, quantity: u32, unit_price: Money) -> Self {
        Self { product_ref: product_ref.into(), quantity, unit_price }
    }

    /// `unit_price × quantity`, or `None` if that is too large to represent.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

//--------------------------------------        Address        ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub recipient: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Address {
    /// The names of the required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("recipient", &self.recipient),
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

//--------------------------------------        NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderValidationError {
    #[error("Cannot create an order from an empty cart")]
    EmptyCart,
    #[error("The {0} address is missing required fields: {1}")]
    InvalidAddress(&'static str, String),
    #[error("Invalid line item. {0}")]
    InvalidLineItem(String),
    #[error("Invalid amount. {0}")]
    InvalidAmount(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    /// The buyer's reference in the catalog/cart service, if known
    #[serde(default)]
    pub customer_ref: Option<String>,
    pub line_items: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub shipping_cost: Money,
    /// ISO 4217 currency code
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY_CODE.to_string()
}

impl NewOrder {
    pub fn new(
        line_items: Vec<LineItem>,
        shipping_address: Address,
        billing_address: Address,
        shipping_cost: Money,
    ) -> Self {
        Self {
            customer_ref: None,
            line_items,
            shipping_address,
            billing_address,
            shipping_cost,
            currency: default_currency(),
        }
    }

    pub fn with_currency<S: Into<String>>(mut self, currency: S) -> Self {
        self.currency = currency.into().to_ascii_uppercase();
        self
    }

    pub fn with_customer_ref<S: Into<String>>(mut self, customer_ref: S) -> Self {
        self.customer_ref = Some(customer_ref.into());
        self
    }

    pub fn subtotal(&self) -> Result<Money, OrderValidationError> {
        line_items_subtotal(&self.line_items)
    }

    /// `Σ(unit_price × quantity) + shipping_cost`
    pub fn total_price(&self) -> Result<Money, OrderValidationError> {
        self.subtotal()?
            .checked_add(self.shipping_cost)
            .ok_or_else(|| OrderValidationError::InvalidAmount("The order total is too large".into()))
    }

    pub fn validate(&self) -> Result<(), OrderValidationError> {
        if self.line_items.is_empty() {
            return Err(OrderValidationError::EmptyCart);
        }
        for item in &self.line_items {
            if item.product_ref.trim().is_empty() {
                return Err(OrderValidationError::InvalidLineItem("Product reference is missing".into()));
            }
            if item.quantity == 0 {
                return Err(OrderValidationError::InvalidLineItem(format!("{} has zero quantity", item.product_ref)));
            }
            if item.unit_price.is_negative() {
                return Err(OrderValidationError::InvalidLineItem(format!(
                    "{} has a negative unit price",
                    item.product_ref
                )));
            }
        }
        for (name, address) in [("shipping", &self.shipping_address), ("billing", &self.billing_address)] {
            let missing = address.missing_fields();
            if !missing.is_empty() {
                return Err(OrderValidationError::InvalidAddress(name, missing.join(", ")));
            }
        }
        if self.shipping_cost.is_negative() {
            return Err(OrderValidationError::InvalidAmount("Shipping cost cannot be negative".into()));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(OrderValidationError::InvalidAmount(format!("{} is not a currency code", self.currency)));
        }
        self.total_price().map(|_| ())
    }
}

/// `Σ(unit_price × quantity)` over `items`.
pub fn line_items_subtotal(items: &[LineItem]) -> Result<Money, OrderValidationError> {
    let mut subtotal = Money::zero();
    for item in items {
        subtotal = item
            .line_total()
            .and_then(|line| subtotal.checked_add(line))
            .ok_or_else(|| OrderValidationError::InvalidAmount(format!("The total for {} is too large", item.product_ref)))?;
    }
    Ok(subtotal)
}

//--------------------------------------         Order         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub customer_ref: Option<String>,
    pub line_items: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub shipping_cost: Money,
    /// Fixed when the order is created. Corrections require a new order.
    pub total_price: Money,
    pub currency: String,
    pub status: OrderStatusType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------        Payment        ---------------------------------------------------------
/// A single payment attempt for an order.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub provider: ProviderCode,
    /// The provider's session or transaction reference. Empty until the provider session has been established.
    pub external_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    /// The last time the reconciliation poller looked at this payment
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub provider: ProviderCode,
    pub amount: Money,
    pub currency: String,
}

impl NewPayment {
    pub fn for_order(order: &Order, provider: ProviderCode) -> Self {
        Self {
            payment_id: PaymentId::random(),
            order_id: order.order_id.clone(),
            provider,
            amount: order.total_price,
            currency: order.currency.clone(),
        }
    }
}

//--------------------------------------   PaymentEventSource  ---------------------------------------------------------
/// What triggered a payment status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventSource {
    /// The buyer's browser came back through the provider's return URL
    ReturnUrl,
    /// The provider pushed a webhook
    Webhook,
    /// The reconciliation poller re-queried the provider
    Poller,
    /// The provider refused to open a session
    SessionSetup,
    /// The buyer cancelled the attempt
    Buyer,
    /// An operator intervened
    Admin,
}

impl Display for PaymentEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentEventSource::ReturnUrl => "return_url",
            PaymentEventSource::Webhook => "webhook",
            PaymentEventSource::Poller => "poller",
            PaymentEventSource::SessionSetup => "session_setup",
            PaymentEventSource::Buyer => "buyer",
            PaymentEventSource::Admin => "admin",
        };
        f.write_str(s)
    }
}

//--------------------------------------      PaymentEvent     ---------------------------------------------------------
/// An entry in the payment audit trail.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: i64,
    pub payment_id: PaymentId,
    pub old_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub source: PaymentEventSource,
    /// The status string exactly as the provider reported it
    pub provider_status: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------      RetryCounter     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct RetryCounter {
    pub order_id: OrderId,
    pub provider: ProviderCode,
    pub consecutive_failures: i64,
    pub updated_at: DateTime<Utc>,
}
