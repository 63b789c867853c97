//! A scriptable, in-process payment provider.
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use opg_common::{from_provider_amount, to_provider_amount};
use order_payment_engine::{
    db_types::{PaymentStatus, ProviderCode},
    traits::{
        OutcomeHint,
        ProviderAdapter,
        ProviderError,
        ProviderReturn,
        ProviderSession,
        ProviderStatus,
        SessionRequest,
        WebhookNotice,
    },
};
use rust_decimal::Decimal;

#[derive(Debug, Default)]
struct StubState {
    session_outcomes: VecDeque<ProviderError>,
    statuses: HashMap<String, Result<ProviderStatus, ProviderError>>,
    transactions: HashMap<String, String>,
    /// Wire amount and currency per reference, as the provider would have stored them
    wire_amounts: HashMap<String, (Decimal, String)>,
    sessions: Vec<SessionRequest>,
    expired: Vec<String>,
    status_calls: usize,
}

#[derive(Debug)]
pub struct StubProvider {
    provider: ProviderCode,
    minor_units: bool,
    session_delay: Option<Duration>,
    state: Mutex<StubState>,
}

impl StubProvider {
    pub fn new(provider: ProviderCode) -> Self {
        Self { provider, minor_units: true, session_delay: None, state: Mutex::new(StubState::default()) }
    }

    pub fn with_major_units(mut self) -> Self {
        self.minor_units = false;
        self
    }

    pub fn with_session_delay(mut self, delay: Duration) -> Self {
        self.session_delay = Some(delay);
        self
    }

    /// The next `create_session` call fails with `err`.
    pub fn fail_next_session(&self, err: ProviderError) {
        self.state.lock().unwrap().session_outcomes.push_back(err);
    }

    pub fn reject_next_session(&self, message: &str) {
        self.fail_next_session(ProviderError::Rejected { provider: self.provider, message: message.to_string() });
    }

    pub fn set_status(&self, reference: &str, status: ProviderStatus) {
        self.state.lock().unwrap().statuses.insert(reference.to_string(), Ok(status));
    }

    pub fn set_status_error(&self, reference: &str, err: ProviderError) {
        self.state.lock().unwrap().statuses.insert(reference.to_string(), Err(err));
    }

    /// Reports the session as paid, with the amount the provider received converted back to canonical form.
    pub fn complete(&self, reference: &str) {
        let (wire, currency) = self.state.lock().unwrap().wire_amounts.get(reference).cloned().expect("unknown reference");
        let amount = from_provider_amount(wire, &currency, self.minor_units).expect("invalid wire amount");
        self.set_status(reference, ProviderStatus::new(PaymentStatus::Completed, "paid").with_amount(amount, currency));
    }

    pub fn fail(&self, reference: &str, reason: &str) {
        self.set_status(reference, ProviderStatus::new(PaymentStatus::Failed, "declined").with_failure_reason(reason));
    }

    pub fn link_transaction(&self, transaction_id: &str, reference: &str) {
        self.state.lock().unwrap().transactions.insert(transaction_id.to_string(), reference.to_string());
    }

    pub fn wire_amount(&self, reference: &str) -> Option<Decimal> {
        self.state.lock().unwrap().wire_amounts.get(reference).map(|(a, _)| *a)
    }

    pub fn sessions(&self) -> Vec<SessionRequest> {
        self.state.lock().unwrap().sessions.clone()
    }

    pub fn expired(&self) -> Vec<String> {
        self.state.lock().unwrap().expired.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().unwrap().status_calls
    }
}

#[async_trait]
impl ProviderAdapter for StubProvider {
    fn provider(&self) -> ProviderCode {
        self.provider
    }

    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession, ProviderError> {
        self.state.lock().unwrap().sessions.push(request.clone());
        if let Some(delay) = self.session_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.state.lock().unwrap().session_outcomes.pop_front() {
            return Err(err);
        }
        let wire = to_provider_amount(request.amount, &request.currency, self.minor_units)?;
        let reference = format!("{}_{}", self.provider, request.payment_id);
        self.state.lock().unwrap().wire_amounts.insert(reference.clone(), (wire, request.currency.clone()));
        Ok(ProviderSession { checkout_url: format!("https://checkout.test/{reference}"), external_reference: reference })
    }

    fn parse_return(&self, params: &HashMap<String, String>) -> Result<ProviderReturn, ProviderError> {
        let hint = match params.get("outcome").map(String::as_str) {
            Some("success") => OutcomeHint::Success,
            Some("cancelled") => OutcomeHint::Cancelled,
            _ => OutcomeHint::Unknown,
        };
        if let Some(reference) = params.get("ref") {
            return Ok(ProviderReturn::session(reference, hint));
        }
        if let Some(txn) = params.get("txn") {
            return Ok(ProviderReturn::transaction(txn, hint));
        }
        Err(ProviderError::MissingReference { provider: self.provider })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookNotice, ProviderError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ProviderError::MalformedResponse { provider: self.provider, message: e.to_string() })?;
        let event_type = value["event"].as_str().unwrap_or("payment.updated").to_string();
        if event_type == "ping" {
            return Err(ProviderError::UnsupportedEvent { provider: self.provider, event_type });
        }
        if let Some(txn) = value["txn"].as_str() {
            return Ok(WebhookNotice::transaction(txn, event_type));
        }
        let reference = value["reference"].as_str().ok_or(ProviderError::MissingReference { provider: self.provider })?;
        Ok(WebhookNotice::session(reference, event_type))
    }

    fn signature_header(&self) -> &'static str {
        "x-stub-signature"
    }

    fn verify_webhook(&self, _body: &[u8], signature: Option<&str>) -> Result<(), ProviderError> {
        match signature {
            Some("valid") => Ok(()),
            _ => Err(ProviderError::InvalidSignature(self.provider)),
        }
    }

    async fn fetch_status(&self, external_reference: &str) -> Result<ProviderStatus, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;
        state
            .statuses
            .get(external_reference)
            .cloned()
            .unwrap_or_else(|| Ok(ProviderStatus::new(PaymentStatus::Pending, "open")))
    }

    async fn reference_for_transaction(&self, transaction_id: &str) -> Result<String, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or(ProviderError::MissingReference { provider: self.provider })
    }

    fn amount_is_minor_units(&self, _currency: &str) -> bool {
        self.minor_units
    }

    async fn expire_session(&self, external_reference: &str) -> Result<(), ProviderError> {
        self.state.lock().unwrap().expired.push(external_reference.to_string());
        Ok(())
    }
}
