use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{Payment, PaymentEventSource, PaymentStatus},
    ope_api::{
        errors::OrchestratorError,
        order_flow_api::OrderFlowApi,
        payment_objects::{ReconciliationResult, SettlementEvent, SettlementOutcome},
    },
    traits::{PaymentGatewayDatabase, ProviderStatus},
};

/// What happened to a single stale payment during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finding {
    Settled,
    StillPending,
    Abandoned,
    TimedOut,
    /// Another trigger settled the payment between the claim and the settlement
    Skipped,
}

impl Finding {
    fn from_settlement(outcome: SettlementOutcome, status: PaymentStatus) -> Self {
        match (outcome, status) {
            (_, PaymentStatus::Pending) => Finding::StillPending,
            (SettlementOutcome::Unchanged, _) => Finding::Skipped,
            _ => Finding::Settled,
        }
    }
}

/// Re-derives the true status of payments that have been pending for too long, covering lost webhooks and buyers who
/// never came back. Every finding goes through [`OrderFlowApi::settle`], exactly like a live callback.
#[derive(Debug, Clone)]
pub struct ReconciliationApi<B> {
    api: OrderFlowApi<B>,
}

impl<B> ReconciliationApi<B>
where B: PaymentGatewayDatabase
{
    pub fn new(api: OrderFlowApi<B>) -> Self {
        Self { api }
    }

    /// Checks up to `batch_size` payments that have been pending for longer than `threshold`, least recently checked
    /// first, so that successive sweeps cycle through every stale payment.
    ///
    /// Payments that never received a provider reference were abandoned while the session was being set up, and are
    /// cancelled. The others are re-queried; an unreachable provider leaves them pending for the next sweep.
    pub async fn reconcile(&self, threshold: Duration, batch_size: i64) -> Result<ReconciliationResult, OrchestratorError> {
        let now = Utc::now();
        let stale = self.api.db().claim_stale_pending_payments(now - threshold, now, batch_size).await?;
        let mut result = ReconciliationResult { examined: stale.len(), ..Default::default() };
        if stale.is_empty() {
            trace!("🕰️ No stale pending payments");
            return Ok(result);
        }
        debug!("🕰️ Reconciling {} stale pending payments", stale.len());
        for payment in stale {
            match self.reconcile_payment(&payment).await {
                Ok(Finding::Settled) => result.settled += 1,
                Ok(Finding::StillPending) => result.still_pending += 1,
                Ok(Finding::Abandoned) => result.abandoned += 1,
                Ok(Finding::TimedOut) => result.timed_out += 1,
                Ok(Finding::Skipped) => result.skipped += 1,
                Err(e) => {
                    error!("🕰️ Could not reconcile payment {}: {e}", payment.payment_id);
                    result.errors += 1;
                },
            }
        }
        info!(
            "🕰️ Reconciliation sweep: {} examined, {} settled, {} still pending, {} abandoned, {} timed out, {} skipped, {} \
             errors",
            result.examined,
            result.settled,
            result.still_pending,
            result.abandoned,
            result.timed_out,
            result.skipped,
            result.errors
        );
        Ok(result)
    }

    async fn reconcile_payment(&self, payment: &Payment) -> Result<Finding, OrchestratorError> {
        let Some(reference) = payment.external_reference.as_deref() else {
            let status = ProviderStatus::new(PaymentStatus::Cancelled, "no_session")
                .with_failure_reason("Abandoned before a provider session was established");
            let event = SettlementEvent::new(payment.payment_id.clone(), status, PaymentEventSource::Poller);
            let settled = self.api.settle(event).await?;
            if settled.outcome == SettlementOutcome::Unchanged {
                debug!("🕰️ Payment {} was already {}", payment.payment_id, settled.payment.status);
                return Ok(Finding::Skipped);
            }
            info!("🕰️ Payment {} never reached {} and has been abandoned", payment.payment_id, payment.provider);
            return Ok(Finding::Abandoned);
        };
        let adapter = self
            .api
            .providers()
            .get(payment.provider)
            .ok_or_else(|| OrchestratorError::UnsupportedProvider(payment.provider.to_string()))?;
        let status = match adapter.fetch_status(reference).await {
            Ok(status) => status,
            Err(e) if e.is_ambiguous() => {
                warn!("🕰️ {} did not answer for payment {}: {e}", payment.provider, payment.payment_id);
                return Ok(Finding::TimedOut);
            },
            Err(e) => return Err(e.into()),
        };
        let event = SettlementEvent::new(payment.payment_id.clone(), status, PaymentEventSource::Poller);
        let settled = self.api.settle(event).await?;
        Ok(Finding::from_settlement(settled.outcome, settled.payment.status))
    }
}
