//! Stripe Checkout Sessions.
//!
//! The session id (`cs_...`) is the external reference. Amounts travel as integer minor units. Stripe substitutes the
//! session id into the success URL; the cancel URL carries nothing but the orchestrator's `status=cancelled` marker.
//!
//! Refund and dispute events are about a charge rather than a session. They name the payment intent, which is looked up
//! in the session list to find the session it belongs to.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use log::*;
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
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    api::RestClient,
    config::StripeConfig,
    helpers::{first_param, outcome_hint, verify_sha256_hex},
    ProviderApiError,
};

const PROVIDER: ProviderCode = ProviderCode::Stripe;
/// Signed webhooks older than this are treated as replays.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeAdapter {
    config: StripeConfig,
    client: RestClient,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig, timeout: Duration) -> Result<Self, ProviderApiError> {
        let client = RestClient::new(&config.api_url, &config.secret_key, timeout)?;
        Ok(Self { config, client })
    }
}

//--------------------------------------   Stripe objects   ----------------------------------------------------------
/// Stripe returns either an id or the full object, depending on `expand[]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> Expandable<T> {
    pub fn object(&self) -> Option<&T> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(o) => Some(o),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    /// `open`, `complete` or `expired`
    pub status: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`
    pub payment_status: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub payment_intent: Option<Expandable<PaymentIntent>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub last_payment_error: Option<StripeError>,
    pub latest_charge: Option<Expandable<Charge>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeError {
    pub message: Option<String>,
    pub decline_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub disputed: bool,
}

/// A page of a Stripe list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

//--------------------------------------   Status mapping   ----------------------------------------------------------
/// Maps a checkout session (with its payment intent and charge expanded) into the canonical vocabulary.
///
/// Only a complete, paid session proves payment. A declined card leaves the session open for another attempt, so a
/// decline on its own is not a failure until the session expires.
pub fn map_session_status(session: &CheckoutSession) -> Result<ProviderStatus, ProviderError> {
    let state = session.status.as_deref().unwrap_or("open");
    let raw = format!("{state}/{}", session.payment_status);
    let intent = session.payment_intent.as_ref().and_then(Expandable::object);
    let charge = intent.and_then(|pi| pi.latest_charge.as_ref()).and_then(Expandable::object);
    let decline = intent.and_then(|pi| pi.last_payment_error.as_ref());
    let mut result = match (state, session.payment_status.as_str()) {
        _ if charge.is_some_and(|c| c.disputed) => ProviderStatus::new(PaymentStatus::Disputed, "charge.disputed"),
        _ if charge.is_some_and(|c| c.refunded) => ProviderStatus::new(PaymentStatus::Refunded, "charge.refunded"),
        ("complete", "paid" | "no_payment_required") => ProviderStatus::new(PaymentStatus::Completed, raw),
        ("expired", _) => match decline {
            Some(e) => {
                let reason = e.message.clone().or_else(|| e.decline_code.clone()).unwrap_or_else(|| "Card declined".into());
                ProviderStatus::new(PaymentStatus::Failed, raw).with_failure_reason(reason)
            },
            None => ProviderStatus::new(PaymentStatus::Cancelled, raw).with_failure_reason("Checkout session expired"),
        },
        _ if intent.is_some_and(|pi| pi.status == "canceled") => {
            ProviderStatus::new(PaymentStatus::Cancelled, "payment_intent/canceled")
        },
        _ => ProviderStatus::new(PaymentStatus::Pending, raw),
    };
    if let (Some(total), Some(currency)) = (session.amount_total, session.currency.as_deref()) {
        let currency = currency.to_ascii_uppercase();
        let amount = from_provider_amount(Decimal::from(total), &currency, true)?;
        result = result.with_amount(amount, currency);
    }
    Ok(result)
}

/// Picks the payment an event is about. Session events carry the session itself. Refund and dispute events carry a
/// charge, refund or dispute object, each of which names the payment intent.
fn webhook_notice(event: StripeEvent) -> Result<WebhookNotice, ProviderError> {
    let object = &event.data.object;
    let event_type = event.event_type;
    if event_type.starts_with("checkout.session.") {
        let id = object["id"].as_str().ok_or(ProviderError::MissingReference { provider: PROVIDER })?;
        return Ok(WebhookNotice::session(id, event_type));
    }
    let is_refund_or_dispute = event_type == "charge.refunded"
        || event_type.starts_with("charge.refund.")
        || event_type.starts_with("charge.dispute.");
    if !is_refund_or_dispute {
        return Err(ProviderError::UnsupportedEvent { provider: PROVIDER, event_type });
    }
    let intent = object["payment_intent"].as_str().ok_or(ProviderError::MissingReference { provider: PROVIDER })?;
    Ok(WebhookNotice::transaction(intent, event_type))
}

/// Checks a `Stripe-Signature` header (`t=<unix time>,v1=<hex hmac>,...`) against the raw body at time `now`.
pub fn verify_signature(secret: &str, body: &[u8], header: &str, now: i64) -> bool {
    let mut timestamp = None;
    let mut signatures = vec![];
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {},
        }
    }
    let Some(timestamp) = timestamp else {
        return false;
    };
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        debug!("🔁️ Stripe signature timestamp {timestamp} is outside the tolerance window");
        return false;
    }
    let mut payload = format!("{timestamp}.").into_bytes();
    payload.extend_from_slice(body);
    signatures.iter().any(|sig| verify_sha256_hex(secret, &payload, sig))
}

fn session_form(request: &SessionRequest) -> Result<Vec<(String, String)>, ProviderError> {
    let currency = request.currency.to_ascii_lowercase();
    let unit_amount = to_provider_amount(request.amount, &request.currency, true)?;
    let mut form = vec![
        ("mode", "payment".to_string()),
        ("client_reference_id", request.payment_id.to_string()),
        ("success_url", format!("{}&session_id={{CHECKOUT_SESSION_ID}}", request.return_urls.success_url)),
        ("cancel_url", request.return_urls.cancel_url.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        ("line_items[0][price_data][currency]", currency),
        ("line_items[0][price_data][unit_amount]", unit_amount.to_string()),
        ("line_items[0][price_data][product_data][name]", format!("Order {}", request.order_id)),
        ("metadata[order_id]", request.order_id.to_string()),
        ("metadata[payment_id]", request.payment_id.to_string()),
    ];
    if let Some(email) = &request.customer_email {
        form.push(("customer_email", email.clone()));
    }
    Ok(form.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn provider(&self) -> ProviderCode {
        PROVIDER
    }

    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession, ProviderError> {
        let form = session_form(&request)?;
        debug!("💳️ Creating Stripe checkout session for payment {}", request.payment_id);
        let session = self
            .client
            .form_query::<CheckoutSession>(Method::POST, "/v1/checkout/sessions", &form)
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        let checkout_url = session.url.ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER,
            message: format!("Checkout session {} has no URL", session.id),
        })?;
        Ok(ProviderSession { external_reference: session.id, checkout_url })
    }

    fn parse_return(&self, params: &HashMap<String, String>) -> Result<ProviderReturn, ProviderError> {
        // Stripe only ever redirects to the success URL after a successful checkout
        let hint = match params.get("status") {
            Some(s) => outcome_hint(Some(s)),
            None => OutcomeHint::Success,
        };
        let session_id =
            first_param(params, &["session_id"]).ok_or(ProviderError::MissingReference { provider: PROVIDER })?;
        Ok(ProviderReturn::session(session_id, hint))
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookNotice, ProviderError> {
        let event: StripeEvent = serde_json::from_slice(body)
            .map_err(|e| ProviderError::MalformedResponse { provider: PROVIDER, message: e.to_string() })?;
        webhook_notice(event)
    }

    fn signature_header(&self) -> &'static str {
        "Stripe-Signature"
    }

    fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<(), ProviderError> {
        let secret = self.config.webhook_secret.reveal();
        match signature {
            Some(header) if !secret.is_empty() && verify_signature(secret, body, header, Utc::now().timestamp()) => {
                Ok(())
            },
            _ => Err(ProviderError::InvalidSignature(PROVIDER)),
        }
    }

    async fn fetch_status(&self, external_reference: &str) -> Result<ProviderStatus, ProviderError> {
        let path = format!("/v1/checkout/sessions/{external_reference}");
        trace!("💳️ Fetching Stripe session {external_reference}");
        let session = self
            .client
            .rest_query::<CheckoutSession, ()>(Method::GET, &path, &[("expand[]", "payment_intent.latest_charge")], None)
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        map_session_status(&session)
    }

    /// Finds the checkout session that created payment intent `transaction_id`.
    async fn reference_for_transaction(&self, transaction_id: &str) -> Result<String, ProviderError> {
        if !transaction_id.starts_with("pi_") {
            debug!("🔁️ {transaction_id} is not a Stripe payment intent");
            return Err(ProviderError::MissingReference { provider: PROVIDER });
        }
        let sessions = self
            .client
            .rest_query::<StripeList<SessionSummary>, ()>(
                Method::GET,
                "/v1/checkout/sessions",
                &[("payment_intent", transaction_id), ("limit", "1")],
                None,
            )
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        sessions.data.into_iter().next().map(|s| s.id).ok_or_else(|| {
            warn!("🔁️ No Stripe checkout session created payment intent {transaction_id}");
            ProviderError::MissingReference { provider: PROVIDER }
        })
    }

    fn amount_is_minor_units(&self, _currency: &str) -> bool {
        true
    }

    async fn expire_session(&self, external_reference: &str) -> Result<(), ProviderError> {
        let path = format!("/v1/checkout/sessions/{external_reference}/expire");
        self.client
            .form_query::<CheckoutSession>(Method::POST, &path, &[])
            .await
            .map_err(|e| e.into_provider_error(PROVIDER))?;
        debug!("💳️ Stripe session {external_reference} expired");
        Ok(())
    }
}
