use log::*;
use order_payment_engine::{ReconciliationApi, SqliteDatabase};
use tokio::task::JoinHandle;

use crate::config::ReconciliationConfig;

/// Starts the reconciliation worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Each tick re-queries the providers for payments that have been pending for longer than the configured threshold,
/// which recovers lost webhooks and buyers who never returned from checkout.
pub fn start_reconciliation_worker(api: ReconciliationApi<SqliteDatabase>, config: ReconciliationConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = config.interval.to_std().unwrap_or(std::time::Duration::from_secs(60));
        let mut timer = tokio::time::interval(period);
        info!("🕰️ Payment reconciliation worker started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running payment reconciliation job");
            match api.reconcile(config.threshold, config.batch_size).await {
                Ok(result) if result.examined > 0 => {
                    debug!(
                        "🕰️ Reconciled {} payments. {} settled, {} abandoned, {} still pending",
                        result.examined, result.settled, result.abandoned, result.still_pending
                    );
                    if result.timed_out > 0 || result.errors > 0 {
                        warn!(
                            "🕰️ {} providers did not answer and {} payments could not be reconciled. They will be \
                             retried on the next run.",
                            result.timed_out, result.errors
                        );
                    }
                },
                Ok(_) => trace!("🕰️ Nothing to reconcile"),
                Err(e) => {
                    error!("🕰️ Error running payment reconciliation job: {e}");
                },
            }
        }
    })
}
