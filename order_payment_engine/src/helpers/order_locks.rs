//! Per-order serialization.
//!
//! Every mutating operation on an order or one of its payments runs while holding that order's lock. Operations on
//! different orders never contend. Lock entries are removed once nobody holds or waits on them, so the map only ever
//! contains orders with work in flight.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::trace;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db_types::OrderId;

#[derive(Debug, Clone, Default)]
pub struct OrderLocks {
    locks: Arc<Mutex<HashMap<OrderId, Arc<AsyncMutex<()>>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `order_id` is free and takes it. The lock is released when the guard is dropped.
    pub async fn lock(&self, order_id: &OrderId) -> OrderGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(order_id.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        trace!("🔒️ Lock acquired for order {order_id}");
        OrderGuard { order_id: order_id.clone(), locks: self.clone(), guard: Some(guard) }
    }

    /// The number of orders that currently have a lock entry.
    pub fn active_count(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    fn release(&self, order_id: &OrderId) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map holds a reference once every guard and waiter is gone.
        if locks.get(order_id).is_some_and(|m| Arc::strong_count(m) == 1) {
            locks.remove(order_id);
        }
    }
}

/// Holds an order's lock for as long as it is alive.
pub struct OrderGuard {
    order_id: OrderId,
    locks: OrderLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        // The mutex reference inside the guard must be gone before checking whether the entry is still in use.
        drop(self.guard.take());
        self.locks.release(&self.order_id);
        trace!("🔓️ Lock released for order {}", self.order_id);
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn same_order_is_serialized() {
        let locks = OrderLocks::new();
        let order_id = OrderId::from("ord_1".to_string());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let order_id = order_id.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(&order_id).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_count(), 0);
    }

    #[tokio::test]
    async fn different_orders_do_not_contend() {
        let locks = OrderLocks::new();
        let a = OrderId::from("ord_a".to_string());
        let b = OrderId::from("ord_b".to_string());
        let _guard_a = locks.lock(&a).await;
        let guard_b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&b)).await;
        assert!(guard_b.is_ok());
        assert_eq!(locks.active_count(), 2);
    }
}
