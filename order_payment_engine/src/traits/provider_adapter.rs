use std::{collections::BTreeMap, collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use opg_common::{Money, MoneyError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{OrderId, PaymentId, PaymentStatus, ProviderCode};

/// Where the provider sends the buyer's browser once checkout is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl ReturnUrls {
    /// Builds the return URLs for `provider` below `base_url`. The provider discriminator is part of the URL so that
    /// the callback can be routed to the right adapter.
    pub fn for_provider(base_url: &str, provider: ProviderCode) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            success_url: format!("{base}/payments/return?provider={provider}"),
            cancel_url: format!("{base}/payments/return?provider={provider}&status=cancelled"),
        }
    }
}

/// The canonical "create payment session" request. The amount is in canonical (major unit) form; each adapter scales
/// it for its own wire format.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub return_urls: ReturnUrls,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub external_reference: String,
    pub checkout_url: String,
}

/// The coarse, client-controlled outcome carried by a return URL. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeHint {
    Success,
    Cancelled,
    Unknown,
}

/// The reference a return URL or webhook identifies the payment by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnReference {
    /// The reference stored with the payment (session id, transaction reference)
    Session(String),
    /// The provider's own transaction id, which has to be exchanged for the stored reference
    Transaction(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReturn {
    pub reference: ReturnReference,
    pub hint: OutcomeHint,
}

impl ProviderReturn {
    pub fn session<S: Into<String>>(reference: S, hint: OutcomeHint) -> Self {
        Self { reference: ReturnReference::Session(reference.into()), hint }
    }

    pub fn transaction<S: Into<String>>(transaction_id: S, hint: OutcomeHint) -> Self {
        Self { reference: ReturnReference::Transaction(transaction_id.into()), hint }
    }
}

/// The payment a webhook is about. Webhook bodies are never trusted for status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotice {
    pub reference: ReturnReference,
    pub event_type: String,
}

impl WebhookNotice {
    pub fn session<S: Into<String>, E: Into<String>>(reference: S, event_type: E) -> Self {
        Self { reference: ReturnReference::Session(reference.into()), event_type: event_type.into() }
    }

    /// Refund and dispute events often only name the provider's transaction, not the session it belongs to.
    pub fn transaction<S: Into<String>, E: Into<String>>(transaction_id: S, event_type: E) -> Self {
        Self { reference: ReturnReference::Transaction(transaction_id.into()), event_type: event_type.into() }
    }
}

/// The authoritative answer of a server-to-server status check, already mapped into canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub status: PaymentStatus,
    /// The amount the provider reports, normalized into canonical form
    pub amount: Option<Money>,
    pub currency: Option<String>,
    pub failure_reason: Option<String>,
    /// The provider's own status string, kept for the audit trail
    pub raw_status: String,
}

impl ProviderStatus {
    pub fn new<S: Into<String>>(status: PaymentStatus, raw_status: S) -> Self {
        Self { status, amount: None, currency: None, failure_reason: None, raw_status: raw_status.into() }
    }

    pub fn with_amount<S: Into<String>>(mut self, amount: Money, currency: S) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.into().to_ascii_uppercase());
        self
    }

    pub fn with_failure_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// The canonical error kinds a provider interaction can produce. Raw transport and decoding errors never escape an
/// adapter in any other form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{provider} rejected the request: {message}")]
    Rejected { provider: ProviderCode, message: String },
    #[error("{0} did not respond in time")]
    Timeout(ProviderCode),
    #[error("{provider} sent a response we could not understand: {message}")]
    MalformedResponse { provider: ProviderCode, message: String },
    #[error("Could not reach {provider}: {message}")]
    Transport { provider: ProviderCode, message: String },
    #[error("The {provider} callback did not carry a payment reference")]
    MissingReference { provider: ProviderCode },
    #[error("{provider} webhook event {event_type} is not relevant to payment status")]
    UnsupportedEvent { provider: ProviderCode, event_type: String },
    #[error("The {0} webhook signature is missing or invalid")]
    InvalidSignature(ProviderCode),
    #[error("The amount cannot be sent to the provider. {0}")]
    Amount(#[from] MoneyError),
}

impl ProviderError {
    /// True if the provider gave no verdict and the outcome of the call is unknown.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport { .. } | Self::MalformedResponse { .. })
    }
}

/// A Provider Adapter translates the canonical payment vocabulary into one provider's API and back.
///
/// Implementations must never leak provider-specific errors: every failure is mapped into a [`ProviderError`].
/// Network calls must be bounded by a timeout, which is reported as [`ProviderError::Timeout`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync + Debug {
    fn provider(&self) -> ProviderCode;

    /// Opens a checkout session. Called at most once per payment.
    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession, ProviderError>;

    /// Extracts the provider reference and an outcome hint from the return URL query parameters. The `provider`
    /// discriminator itself is ignored.
    fn parse_return(&self, params: &HashMap<String, String>) -> Result<ProviderReturn, ProviderError>;

    /// Extracts the payment reference, or the provider transaction id, from a webhook body.
    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookNotice, ProviderError>;

    /// The name of the header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;

    /// Checks the authenticity of a webhook body.
    fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<(), ProviderError>;

    /// The authoritative server-to-server status check.
    async fn fetch_status(&self, external_reference: &str) -> Result<ProviderStatus, ProviderError>;

    /// Exchanges a provider transaction id for the reference stored with the payment. Only providers whose return
    /// URLs or webhooks may carry nothing but their own transaction id need to support this.
    async fn reference_for_transaction(&self, _transaction_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::MissingReference { provider: self.provider() })
    }

    /// Whether this provider's wire amounts for `currency` are integer minor units.
    fn amount_is_minor_units(&self, currency: &str) -> bool;

    /// Asks the provider to close a checkout session the buyer has abandoned. Providers without such a facility
    /// accept the request and do nothing.
    async fn expire_session(&self, _external_reference: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// The set of configured provider adapters, keyed by provider code.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<ProviderCode, Arc<dyn ProviderAdapter>>,
}

impl Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProviderRegistry({:?})", self.providers())
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous adapter for the same provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: ProviderCode) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn providers(&self) -> Vec<ProviderCode> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Any configured provider other than `failing`, preferring the first in a stable order.
    pub fn alternate_to(&self, failing: ProviderCode) -> Option<ProviderCode> {
        self.adapters.keys().copied().find(|p| *p != failing)
    }
}
