use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, Payment, PaymentEventSource, PaymentId, ProviderCode},
    traits::{OutcomeHint, ProviderStatus},
};

/// The result of opening a payment session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpened {
    pub payment: Payment,
    pub checkout_url: String,
    /// Set once the order has failed repeatedly with one provider. Advisory only.
    pub suggested_provider: Option<ProviderCode>,
}

/// A provider finding to be reconciled into local state, whatever triggered it.
#[derive(Debug, Clone)]
pub struct SettlementEvent {
    pub payment_id: PaymentId,
    pub status: ProviderStatus,
    pub source: PaymentEventSource,
}

impl SettlementEvent {
    pub fn new(payment_id: PaymentId, status: ProviderStatus, source: PaymentEventSource) -> Self {
        Self { payment_id, status, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// The payment already reflected the reported status. Nothing was written.
    Unchanged,
    /// The reported status was applied.
    Applied,
    /// Something was written, but the provider and local records disagree and a conflict event has been raised.
    Conflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub outcome: SettlementOutcome,
    pub payment: Payment,
    pub order: Order,
}

/// The outcome of handling a provider return or webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedCallback {
    pub payment: Payment,
    pub hint: OutcomeHint,
    /// The authoritative status, if the provider could be reached
    pub status: Option<ProviderStatus>,
    /// An alternate provider to offer if the order keeps failing with this one
    pub suggested_provider: Option<ProviderCode>,
}

impl ResolvedCallback {
    /// True if `status` came from the provider rather than being left pending for reconciliation.
    pub fn is_authoritative(&self) -> bool {
        self.status.is_some()
    }
}

/// A summary of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub examined: usize,
    pub settled: usize,
    pub still_pending: usize,
    pub abandoned: usize,
    pub timed_out: usize,
    /// Payments that were already settled by a callback by the time the sweep reached them
    pub skipped: usize,
    pub errors: usize,
}
