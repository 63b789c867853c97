//! Paystack transactions.
//!
//! The payment id doubles as the Paystack transaction reference. Amounts travel as integer minor units (kobo,
//! pesewas, cents). Webhooks are signed with an HMAC-SHA512 of the raw body, keyed with the secret key.
//!
//! A disputed transaction still verifies as `success`, so successful transactions are checked against the dispute list
//! as well.
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
    config::PaystackConfig,
    helpers::{first_param, outcome_hint, verify_sha512_hex},
    ProviderApiError,
};

const PROVIDER: ProviderCode = ProviderCode::Paystack;

#[derive(Debug, Clone)]
pub struct PaystackAdapter {
    config: PaystackConfig,
    client: RestClient,
}

impl PaystackAdapter {
    pub fn new(config: PaystackConfig, timeout: Duration) -> Result<Self, ProviderApiError> {
        let client = RestClient::new(&config.api_url, &config.secret_key, timeout)?;
        Ok(Self { config, client })
    }
}

/// Every Paystack response is wrapped in this envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ProviderError> {
        match (self.status, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(ProviderError::MalformedResponse { provider: PROVIDER, message: self.message }),
            (false, _) => Err(ProviderError::Rejected { provider: PROVIDER, message: self.message }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InitializedTransaction {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    /// Paystack's numeric id, used to look up disputes
    #[serde(default)]
    pub id: i64,
    pub reference: String,
    /// `success`, `failed`, `abandoned`, `ongoing`, `pending`, `processing`, `queued` or `reversed`
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub gateway_response: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dispute {
    pub id: i64,
    /// `awaiting-merchant-feedback`, `awaiting-bank-feedback`, `pending` or `resolved`
    pub status: String,
    /// `merchant-accepted` or `declined` once resolved
    pub resolution: Option<String>,
}

impl Dispute {
    /// A dispute the merchant won no longer puts the payment in question.
    pub fn is_open_or_lost(&self) -> bool {
        !(self.status == "resolved" && self.resolution.as_deref() == Some("declined"))
    }
}

/// Maps a verified Paystack transaction, and the disputes raised against it, into the canonical vocabulary.
/// `abandoned` only means the buyer has not finished yet; the checkout page can still be completed, so it stays
/// pending.
pub fn map_transaction_status(tx: &Transaction, disputes: &[Dispute]) -> Result<ProviderStatus, ProviderError> {
    let result = match tx.status.as_str() {
        "success" => match disputes.iter().find(|d| d.is_open_or_lost()) {
            Some(dispute) => ProviderStatus::new(PaymentStatus::Disputed, format!("dispute/{}", dispute.status)),
            None => ProviderStatus::new(PaymentStatus::Completed, &tx.status),
        },
        "failed" => {
            let reason = tx.gateway_response.clone().unwrap_or_else(|| "Declined".into());
            ProviderStatus::new(PaymentStatus::Failed, &tx.status).with_failure_reason(reason)
        },
        "reversed" => ProviderStatus::new(PaymentStatus::Refunded, &tx.status),
        _ => ProviderStatus::new(PaymentStatus::Pending, &tx.status),
    };
    let currency = tx.currency.to_ascii_uppercase();
    let amount = from_provider_amount(Decimal::from(tx.amount), &currency, true)?;
    Ok(result.with_amount(amount, currency))
}

/// Finds the transaction reference in a webhook event. Refund and dispute events nest it differently.
fn webhook_reference(event_type: &str, data: &Value) -> Option<String> {
    let reference = if event_type.starts_with("charge.dispute.") {
        &data["transaction"]["reference"]
    } else if event_type.starts_with("refund.") {
        &data["transaction_reference"]
    } else {
        &data["reference"]
    };
    reference.as_str().map(str::to_string)
}

fn is_relevant_event(event_type: &str) -> bool {
    matches!(event_type, "charge.success" | "charge.failed")
        || event_type.starts_with("charge.dispute.")
        || event_type.starts_with("refund.")
}

impl PaystackAdapter {
    async fn fetch_disputes(&self, transaction_id: i64) -> Result<Vec<Dispute>, ProviderError> {
        let id = transaction_id.to_string();
        trace!("💳️ Fetching disputes for Paystack transaction {id}");
        let response = self
            .client
            .rest_query::<Envelope<Vec<Dispute>>, ()>(Method::GET, "/dispute", &[("transaction", id.as_str())], None)
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        let disputes = response.into_data()?;
        if !disputes.is_empty() {
            debug!("💳️ Paystack transaction {id} has {} dispute(s)", disputes.len());
        }
        Ok(disputes)
    }
}

#[async_trait]
impl ProviderAdapter for PaystackAdapter {
    fn provider(&self) -> ProviderCode {
        PROVIDER
    }

    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession, ProviderError> {
        let email = request.customer_email.as_deref().ok_or_else(|| ProviderError::Rejected {
            provider: PROVIDER,
            message: "Paystack requires a customer email address".into(),
        })?;
        let amount = to_provider_amount(request.amount, &request.currency, true)?;
        let body = json!({
            "email": email,
            "amount": amount.to_string(),
            "currency": request.currency,
            "reference": request.payment_id.as_str(),
            "callback_url": request.return_urls.success_url,
            "metadata": {
                "order_id": request.order_id.as_str(),
                "cancel_action": request.return_urls.cancel_url,
            },
        });
        debug!("💳️ Initializing Paystack transaction {}", request.payment_id);
        let response = self
            .client
            .rest_query::<Envelope<InitializedTransaction>, Value>(Method::POST, "/transaction/initialize", &[], Some(body))
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        let tx = response.into_data()?;
        Ok(ProviderSession { external_reference: tx.reference, checkout_url: tx.authorization_url })
    }

    fn parse_return(&self, params: &HashMap<String, String>) -> Result<ProviderReturn, ProviderError> {
        let reference =
            first_param(params, &["reference", "trxref"]).ok_or(ProviderError::MissingReference { provider: PROVIDER })?;
        Ok(ProviderReturn::session(reference, outcome_hint(params.get("status").map(String::as_str))))
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookNotice, ProviderError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ProviderError::MalformedResponse { provider: PROVIDER, message: e.to_string() })?;
        let event_type = value["event"].as_str().unwrap_or_default().to_string();
        if !is_relevant_event(&event_type) {
            return Err(ProviderError::UnsupportedEvent { provider: PROVIDER, event_type });
        }
        let reference =
            webhook_reference(&event_type, &value["data"]).ok_or(ProviderError::MissingReference { provider: PROVIDER })?;
        Ok(WebhookNotice::session(reference, event_type))
    }

    fn signature_header(&self) -> &'static str {
        "x-paystack-signature"
    }

    fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<(), ProviderError> {
        match signature {
            Some(sig) if verify_sha512_hex(self.config.secret_key.reveal(), body, sig) => Ok(()),
            _ => Err(ProviderError::InvalidSignature(PROVIDER)),
        }
    }

    async fn fetch_status(&self, external_reference: &str) -> Result<ProviderStatus, ProviderError> {
        let path = format!("/transaction/verify/{external_reference}");
        trace!("💳️ Verifying Paystack transaction {external_reference}");
        let response = self
            .client
            .rest_query::<Envelope<Transaction>, ()>(Method::GET, &path, &[], None)
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        let tx = response.into_data()?;
        let disputes = if tx.status == "success" && tx.id > 0 { self.fetch_disputes(tx.id).await? } else { vec![] };
        map_transaction_status(&tx, &disputes)
    }

    fn amount_is_minor_units(&self, _currency: &str) -> bool {
        true
    }
}
