use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    OrderStatusChangedEvent,
    PaymentConflictEvent,
    PaymentStatusChangedEvent,
};

/// The publishing side of the configured hooks. Cheap to clone; the orchestrator holds one copy.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_status_changed_producer: Vec<EventProducer<OrderStatusChangedEvent>>,
    pub payment_status_changed_producer: Vec<EventProducer<PaymentStatusChangedEvent>>,
    pub payment_conflict_producer: Vec<EventProducer<PaymentConflictEvent>>,
}

impl EventProducers {
    pub async fn publish_order_status_changed(&self, event: OrderStatusChangedEvent) {
        for producer in &self.order_status_changed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_payment_status_changed(&self, event: PaymentStatusChangedEvent) {
        for producer in &self.payment_status_changed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_payment_conflict(&self, event: PaymentConflictEvent) {
        warn!(
            "📬️ Payment {} needs manual reconciliation: {:?}. {}",
            event.payment.payment_id, event.kind, event.detail
        );
        for producer in &self.payment_conflict_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_order_status_changed: Option<EventHandler<OrderStatusChangedEvent>>,
    pub on_payment_status_changed: Option<EventHandler<PaymentStatusChangedEvent>>,
    pub on_payment_conflict: Option<EventHandler<PaymentConflictEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_status_changed = hooks.on_order_status_changed.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_status_changed = hooks.on_payment_status_changed.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_conflict = hooks.on_payment_conflict.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_status_changed, on_payment_status_changed, on_payment_conflict }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_status_changed {
            result.order_status_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_status_changed {
            result.payment_status_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_conflict {
            result.payment_conflict_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns one task per configured handler. Each task ends once all producers for it have been dropped.
    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_status_changed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_payment_status_changed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_payment_conflict {
            tokio::spawn(handler.start_handler());
        }
    }
}

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_status_changed: Option<Handler<OrderStatusChangedEvent>>,
    pub on_payment_status_changed: Option<Handler<PaymentStatusChangedEvent>>,
    pub on_payment_conflict: Option<Handler<PaymentConflictEvent>>,
}

impl EventHooks {
    pub fn on_order_status_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderStatusChangedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_order_status_changed = Some(Arc::new(f));
        self
    }

    pub fn on_payment_status_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentStatusChangedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_payment_status_changed = Some(Arc::new(f));
        self
    }

    pub fn on_payment_conflict<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentConflictEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_payment_conflict = Some(Arc::new(f));
        self
    }
}
