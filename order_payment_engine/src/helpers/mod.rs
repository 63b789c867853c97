mod order_locks;

pub use order_locks::{OrderGuard, OrderLocks};
