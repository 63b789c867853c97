//! Turns provider return URLs and webhooks into settlements.
//!
//! Neither a return URL nor a webhook body is ever trusted for the payment's status. They only identify the payment;
//! the status always comes from the provider's status endpoint.
use std::collections::HashMap;

use log::*;

use crate::{
    db_types::{Payment, PaymentEventSource, ProviderCode},
    ope_api::{
        errors::OrchestratorError,
        order_flow_api::OrderFlowApi,
        payment_objects::{ResolvedCallback, SettlementEvent},
    },
    traits::{OutcomeHint, PaymentGatewayDatabase, ProviderAdapter, ProviderError, ReturnReference},
};

#[derive(Debug, Clone)]
pub struct CallbackResolver<B> {
    api: OrderFlowApi<B>,
}

impl<B> CallbackResolver<B>
where B: PaymentGatewayDatabase
{
    pub fn new(api: OrderFlowApi<B>) -> Self {
        Self { api }
    }

    /// Handles the buyer's browser coming back from the provider.
    ///
    /// Fails with [`OrchestratorError::UnknownReference`] if the reference does not match any payment, for instance when
    /// a stale URL is replayed. No payment is ever created from a callback.
    pub async fn resolve(
        &self,
        provider: ProviderCode,
        params: &HashMap<String, String>,
    ) -> Result<ResolvedCallback, OrchestratorError> {
        let adapter = self.adapter(provider)?;
        let ret = adapter.parse_return(params)?;
        let reference = stored_reference(adapter.as_ref(), ret.reference).await?;
        debug!("🔁️ {provider} return for reference {reference} with hint {:?}", ret.hint);
        let payment = self.payment_for_reference(provider, &reference).await?;
        self.settle_from_provider(adapter.as_ref(), payment, &reference, ret.hint, PaymentEventSource::ReturnUrl).await
    }

    /// Handles a provider webhook. The signature is checked first if `verify_signature` is set.
    pub async fn resolve_webhook(
        &self,
        provider: ProviderCode,
        body: &[u8],
        signature: Option<&str>,
        verify_signature: bool,
    ) -> Result<ResolvedCallback, OrchestratorError> {
        let adapter = self.adapter(provider)?;
        if verify_signature {
            adapter.verify_webhook(body, signature).map_err(|e| {
                warn!("🔁️ Rejecting {provider} webhook: {e}");
                OrchestratorError::from(e)
            })?;
        }
        let notice = adapter.parse_webhook(body)?;
        let reference = stored_reference(adapter.as_ref(), notice.reference).await?;
        debug!("🔁️ {provider} webhook {} for reference {reference}", notice.event_type);
        let payment = self.payment_for_reference(provider, &reference).await?;
        self.settle_from_provider(adapter.as_ref(), payment, &reference, OutcomeHint::Unknown, PaymentEventSource::Webhook)
            .await
    }

    /// The name of the header that carries `provider`'s webhook signature.
    pub fn signature_header(&self, provider: ProviderCode) -> Result<&'static str, OrchestratorError> {
        Ok(self.adapter(provider)?.signature_header())
    }

    fn adapter(&self, provider: ProviderCode) -> Result<std::sync::Arc<dyn ProviderAdapter>, OrchestratorError> {
        self.api.providers().get(provider).ok_or_else(|| OrchestratorError::UnsupportedProvider(provider.to_string()))
    }

    async fn payment_for_reference(&self, provider: ProviderCode, reference: &str) -> Result<Payment, OrchestratorError> {
        self.api.db().fetch_payment_by_reference(provider, reference).await?.ok_or_else(|| {
            error!("🔁️ No payment matches {provider} reference {reference}. This needs to be investigated manually.");
            OrchestratorError::UnknownReference { provider, reference: reference.to_string() }
        })
    }

    /// Asks the provider for the authoritative status and settles it. A provider that cannot be reached leaves the
    /// payment as it is for the reconciliation poller.
    async fn settle_from_provider(
        &self,
        adapter: &dyn ProviderAdapter,
        payment: Payment,
        reference: &str,
        hint: OutcomeHint,
        source: PaymentEventSource,
    ) -> Result<ResolvedCallback, OrchestratorError> {
        let order_id = payment.order_id.clone();
        let (payment, status) = match adapter.fetch_status(reference).await {
            Ok(status) => {
                let event = SettlementEvent::new(payment.payment_id.clone(), status.clone(), source);
                let settled = self.api.settle(event).await?;
                (settled.payment, Some(status))
            },
            Err(e) if e.is_ambiguous() => {
                warn!(
                    "🔁️ Could not confirm the status of payment {} with {}: {e}. Leaving it for reconciliation.",
                    payment.payment_id,
                    adapter.provider()
                );
                (payment, None)
            },
            Err(e) => return Err(e.into()),
        };
        let suggested_provider = self.api.suggested_alternate(&order_id).await?;
        Ok(ResolvedCallback { payment, hint, status, suggested_provider })
    }
}

/// The reference stored with the payment. Provider transaction ids are looked up with the provider.
async fn stored_reference(adapter: &dyn ProviderAdapter, reference: ReturnReference) -> Result<String, ProviderError> {
    match reference {
        ReturnReference::Session(reference) => Ok(reference),
        ReturnReference::Transaction(id) => {
            trace!("🔁️ Exchanging {} transaction id {id} for its reference", adapter.provider());
            adapter.reference_for_transaction(&id).await
        },
    }
}
