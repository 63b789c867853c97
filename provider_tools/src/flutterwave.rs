//! Flutterwave Standard checkout.
//!
//! The payment id is sent as `tx_ref` and used as the external reference. Amounts travel as decimal major units.
//! Webhooks carry the shared secret hash in the `verif-hash` header rather than a signature.
//!
//! Refund and chargeback webhooks may only name Flutterwave's numeric transaction id, which is exchanged for the
//! `tx_ref`. Chargebacks are not reflected in the transaction status, so successful transactions are checked against
//! the chargeback list.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use log::*;
use opg_common::{from_provider_amount, to_provider_amount};
use order_payment_engine::{
    db_types::{PaymentStatus, ProviderCode},
    traits::{
        ProviderAdapter,
        ProviderError,
        ProviderReturn,
        ProviderSession,
        ProviderStatus,
        SessionRequest,
        WebhookNotice,
    },
};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    api::RestClient,
    config::FlutterwaveConfig,
    helpers::{constant_time_eq, first_param, outcome_hint},
    ProviderApiError,
};

const PROVIDER: ProviderCode = ProviderCode::Flutterwave;

#[derive(Debug, Clone)]
pub struct FlutterwaveAdapter {
    config: FlutterwaveConfig,
    client: RestClient,
}

impl FlutterwaveAdapter {
    pub fn new(config: FlutterwaveConfig, timeout: Duration) -> Result<Self, ProviderApiError> {
        let client = RestClient::new(&config.api_url, &config.secret_key, timeout)?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ProviderError> {
        match (self.status.as_str(), self.data) {
            ("success", Some(data)) => Ok(data),
            ("success", None) => Err(ProviderError::MalformedResponse { provider: PROVIDER, message: self.message }),
            _ => Err(ProviderError::Rejected { provider: PROVIDER, message: self.message }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentLink {
    link: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub tx_ref: String,
    /// Flutterwave's own reference, used to look up chargebacks
    #[serde(default)]
    pub flw_ref: Option<String>,
    /// `successful`, `failed`, `pending`, `cancelled`, or `refunded`/`reversed` once the money went back
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub processor_response: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chargeback {
    pub id: i64,
    /// `initiated`, `pending`, `accepted`, `declined`, `lost` or `won`
    pub status: String,
    pub stage: Option<String>,
}

impl Chargeback {
    pub fn is_open_or_lost(&self) -> bool {
        !self.status.eq_ignore_ascii_case("won")
    }
}

pub fn map_transaction_status(tx: &Transaction, chargebacks: &[Chargeback]) -> Result<ProviderStatus, ProviderError> {
    let result = match tx.status.as_str() {
        "successful" => match chargebacks.iter().find(|c| c.is_open_or_lost()) {
            Some(chargeback) => ProviderStatus::new(PaymentStatus::Disputed, format!("chargeback/{}", chargeback.status)),
            None => ProviderStatus::new(PaymentStatus::Completed, &tx.status),
        },
        "refunded" | "reversed" => ProviderStatus::new(PaymentStatus::Refunded, &tx.status),
        "failed" => {
            let reason = tx.processor_response.clone().unwrap_or_else(|| "Declined".into());
            ProviderStatus::new(PaymentStatus::Failed, &tx.status).with_failure_reason(reason)
        },
        "cancelled" => ProviderStatus::new(PaymentStatus::Cancelled, &tx.status),
        _ => ProviderStatus::new(PaymentStatus::Pending, &tx.status),
    };
    let currency = tx.currency.to_ascii_uppercase();
    let amount = from_provider_amount(tx.amount, &currency, false)?;
    Ok(result.with_amount(amount, currency))
}

fn is_relevant_event(event_type: &str) -> bool {
    event_type == "charge.completed" || event_type.starts_with("refund.") || event_type.starts_with("chargeback.")
}

/// Payment events carry the `tx_ref`. Refund and chargeback events may only carry the numeric transaction id, under
/// one of several names.
fn webhook_notice(event_type: String, data: &Value) -> Result<WebhookNotice, ProviderError> {
    if let Some(tx_ref) = data["tx_ref"].as_str().filter(|r| !r.is_empty()) {
        return Ok(WebhookNotice::session(tx_ref, event_type));
    }
    let transaction_id = ["tx_id", "transaction_id", "TransactionId"].iter().find_map(|key| match &data[*key] {
        Value::Number(n) => n.as_i64().map(|id| id.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    });
    transaction_id
        .map(|id| WebhookNotice::transaction(id, event_type))
        .ok_or(ProviderError::MissingReference { provider: PROVIDER })
}

/// Flutterwave answers a lookup for a `tx_ref` nobody has paid against yet with a client error. That proves nothing
/// about the outcome, so it is read as "still pending".
fn is_unknown_transaction(err: &ProviderApiError) -> bool {
    match err {
        ProviderApiError::QueryError { status, message } => {
            (*status == 400 || *status == 404) && message.to_ascii_lowercase().contains("no transaction")
        },
        _ => false,
    }
}

impl FlutterwaveAdapter {
    async fn fetch_chargebacks(&self, flw_ref: &str) -> Result<Vec<Chargeback>, ProviderError> {
        trace!("💳️ Fetching chargebacks for Flutterwave transaction {flw_ref}");
        let response = self
            .client
            .rest_query::<Envelope<Vec<Chargeback>>, ()>(Method::GET, "/v3/chargebacks", &[("flw_ref", flw_ref)], None)
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        let chargebacks = response.into_data()?;
        if !chargebacks.is_empty() {
            debug!("💳️ Flutterwave transaction {flw_ref} has {} chargeback(s)", chargebacks.len());
        }
        Ok(chargebacks)
    }
}

#[async_trait]
impl ProviderAdapter for FlutterwaveAdapter {
    fn provider(&self) -> ProviderCode {
        PROVIDER
    }

    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession, ProviderError> {
        let email = request.customer_email.as_deref().ok_or_else(|| ProviderError::Rejected {
            provider: PROVIDER,
            message: "Flutterwave requires a customer email address".into(),
        })?;
        let amount = to_provider_amount(request.amount, &request.currency, false)?;
        let tx_ref = request.payment_id.to_string();
        let body = json!({
            "tx_ref": tx_ref,
            "amount": amount.to_string(),
            "currency": request.currency,
            "redirect_url": request.return_urls.success_url,
            "customer": { "email": email },
            "customizations": { "title": format!("Order {}", request.order_id) },
            "meta": { "order_id": request.order_id.as_str() },
        });
        debug!("💳️ Creating Flutterwave payment link for {tx_ref}");
        let response = self
            .client
            .rest_query::<Envelope<PaymentLink>, Value>(Method::POST, "/v3/payments", &[], Some(body))
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        let link = response.into_data()?;
        Ok(ProviderSession { external_reference: tx_ref, checkout_url: link.link })
    }

    fn parse_return(&self, params: &HashMap<String, String>) -> Result<ProviderReturn, ProviderError> {
        let hint = outcome_hint(params.get("status").map(String::as_str));
        if let Some(tx_ref) = first_param(params, &["tx_ref"]) {
            return Ok(ProviderReturn::session(tx_ref, hint));
        }
        first_param(params, &["transaction_id"])
            .map(|id| ProviderReturn::transaction(id, hint))
            .ok_or(ProviderError::MissingReference { provider: PROVIDER })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookNotice, ProviderError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ProviderError::MalformedResponse { provider: PROVIDER, message: e.to_string() })?;
        let event_type = value["event"].as_str().unwrap_or_default().to_string();
        if !is_relevant_event(&event_type) {
            return Err(ProviderError::UnsupportedEvent { provider: PROVIDER, event_type });
        }
        webhook_notice(event_type, &value["data"])
    }

    fn signature_header(&self) -> &'static str {
        "verif-hash"
    }

    fn verify_webhook(&self, _body: &[u8], signature: Option<&str>) -> Result<(), ProviderError> {
        let expected = self.config.webhook_hash.reveal();
        match signature {
            Some(hash) if !expected.is_empty() && constant_time_eq(hash.trim().as_bytes(), expected.as_bytes()) => Ok(()),
            _ => Err(ProviderError::InvalidSignature(PROVIDER)),
        }
    }

    async fn fetch_status(&self, external_reference: &str) -> Result<ProviderStatus, ProviderError> {
        trace!("💳️ Verifying Flutterwave transaction {external_reference}");
        let response = self
            .client
            .rest_query::<Envelope<Transaction>, ()>(
                Method::GET,
                "/v3/transactions/verify_by_reference",
                &[("tx_ref", external_reference)],
                None,
            )
            .await;
        match response {
            Ok(envelope) => {
                let tx = envelope.into_data()?;
                let chargebacks = match tx.flw_ref.as_deref() {
                    Some(flw_ref) if tx.status == "successful" => self.fetch_chargebacks(flw_ref).await?,
                    _ => vec![],
                };
                map_transaction_status(&tx, &chargebacks)
            },
            Err(e) if is_unknown_transaction(&e) => {
                debug!("💳️ Flutterwave has no transaction for {external_reference} yet");
                Ok(ProviderStatus::new(PaymentStatus::Pending, "no_transaction"))
            },
            Err(e) => Err(e.into_provider_error(PROVIDER)),
        }
    }

    async fn reference_for_transaction(&self, transaction_id: &str) -> Result<String, ProviderError> {
        if transaction_id.is_empty() || !transaction_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProviderError::MissingReference { provider: PROVIDER });
        }
        let path = format!("/v3/transactions/{transaction_id}/verify");
        let response = self
            .client
            .rest_query::<Envelope<Transaction>, ()>(Method::GET, &path, &[], None)
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        Ok(response.into_data()?.tx_ref)
    }

    fn amount_is_minor_units(&self, _currency: &str) -> bool {
        false
    }
}
