//! The server's subscribers to engine events. They only log for now; a notification layer (emails to the buyer,
//! fulfillment webhooks) would hook in here as well.
use std::{future::Future, pin::Pin};

use log::*;
use order_payment_engine::events::{EventHooks, OrderStatusChangedEvent, PaymentConflictEvent, PaymentStatusChangedEvent};

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_order_status_changed(|ev| Box::pin(async move { log_order_status_changed(ev) }) as HookFuture)
        .on_payment_status_changed(|ev| Box::pin(async move { log_payment_status_changed(ev) }) as HookFuture)
        .on_payment_conflict(|ev| Box::pin(async move { log_payment_conflict(ev) }) as HookFuture);
    hooks
}

fn log_order_status_changed(ev: OrderStatusChangedEvent) {
    info!("📬️ Order {} is now {} (was {})", ev.order.order_id, ev.order.status, ev.old_status);
}

fn log_payment_status_changed(ev: PaymentStatusChangedEvent) {
    let p = &ev.payment;
    match &p.failure_reason {
        Some(reason) => info!(
            "📬️ {} payment {} for order {} is now {} (was {}, via {}). {reason}",
            p.provider, p.payment_id, p.order_id, p.status, ev.old_status, ev.source
        ),
        None => info!(
            "📬️ {} payment {} for order {} is now {} (was {}, via {})",
            p.provider, p.payment_id, p.order_id, p.status, ev.old_status, ev.source
        ),
    }
}

fn log_payment_conflict(ev: PaymentConflictEvent) {
    let order = ev.order.as_ref().map(|o| format!("order {} is {}", o.order_id, o.status)).unwrap_or_default();
    error!(
        "📬️ MANUAL ACTION NEEDED. {:?} on {} payment {}: provider says {}, we have {}. {} {order}",
        ev.kind, ev.payment.provider, ev.payment.payment_id, ev.reported_status, ev.payment.status, ev.detail
    );
}
