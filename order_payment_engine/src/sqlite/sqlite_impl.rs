//! `SqliteDatabase` is the shipped storage backend for the order payment engine.
//!
//! It implements [`PaymentGatewayDatabase`] on top of the low-level functions in [`super::db`]. Multi-step writes are
//! wrapped in a transaction, so either all of their effects are visible or none are.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate, SqlitePool};

use super::db::{db_url, new_memory_pool, new_pool, orders, payment_events, payments, retry_counters};
use crate::{
    db_types::{
        NewOrder,
        NewPayment,
        Order,
        OrderId,
        OrderStatusType,
        Payment,
        PaymentEvent,
        PaymentId,
        ProviderCode,
        RetryCounter,
    },
    order_objects::OrderChanged,
    traits::{PaymentGatewayDatabase, PaymentGatewayError, PaymentUpdate, PaymentUpdateResult, RetryCounterAction},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order_id: OrderId, order: NewOrder) -> Result<Order, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        orders::insert_order(order_id, order, Utc::now(), &mut conn).await
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn update_order_status(
        &self,
        order_id: &OrderId,
        from: OrderStatusType,
        to: OrderStatusType,
    ) -> Result<OrderChanged, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let changed = orders::update_order_status(order_id, from, to, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(changed)
    }

    async fn insert_pending_payment(&self, payment: NewPayment) -> Result<Payment, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::insert_pending_payment(payment, Utc::now(), &mut conn).await
    }

    async fn attach_session(
        &self,
        payment_id: &PaymentId,
        external_reference: &str,
        checkout_url: Option<&str>,
    ) -> Result<Payment, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::attach_session(payment_id, external_reference, checkout_url, Utc::now(), &mut conn).await
    }

    async fn fetch_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment(payment_id, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payment_by_reference(
        &self,
        provider: ProviderCode,
        external_reference: &str,
    ) -> Result<Option<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment_by_reference(provider, external_reference, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payments_for_order(&self, order_id: &OrderId) -> Result<Vec<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_payments_for_order(order_id, &mut conn).await?;
        Ok(payments)
    }

    async fn claim_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        checked_at: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::claim_stale_pending_payments(created_before, checked_at, limit, &mut conn).await?;
        trace!("🗃️ Claimed {} pending payments created before {created_before}", payments.len());
        Ok(payments)
    }

    /// In a single atomic transaction:
    /// * checks that the payment still has the expected status,
    /// * writes the new payment status (and `paid_at` on completion),
    /// * moves the order, if requested, with its own compare-and-set check,
    /// * updates the retry counters,
    /// * appends an entry to the payment audit trail.
    async fn apply_payment_update(&self, update: PaymentUpdate) -> Result<PaymentUpdateResult, PaymentGatewayError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let current = payments::fetch_payment(&update.payment_id, &mut tx)
            .await?
            .ok_or_else(|| PaymentGatewayError::PaymentNotFound(update.payment_id.clone()))?;
        let status_changed = |actual| PaymentGatewayError::PaymentStatusChanged {
            payment_id: update.payment_id.clone(),
            expected: update.expected_status,
            actual,
        };
        if current.status != update.expected_status {
            return Err(status_changed(current.status));
        }
        let payment =
            payments::update_payment_status(&update, now, &mut tx).await?.ok_or_else(|| status_changed(current.status))?;
        let order = match update.order_transition {
            Some((from, to)) => {
                let changed = orders::update_order_status(&payment.order_id, from, to, now, &mut tx).await?;
                Some((changed.old_order, changed.new_order))
            },
            None => None,
        };
        match update.retry_counters {
            RetryCounterAction::Unchanged => {},
            RetryCounterAction::RecordFailure => {
                retry_counters::record_failure(&payment.order_id, payment.provider, now, &mut tx).await?
            },
            RetryCounterAction::Reset => retry_counters::reset(&payment.order_id, now, &mut tx).await?,
        }
        payment_events::insert_event(&update, current.status, now, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Payment {} moved from {} to {} ({})",
            payment.payment_id, current.status, payment.status, update.source
        );
        Ok(PaymentUpdateResult::new(current.status, payment, order))
    }

    async fn fetch_retry_counters(&self, order_id: &OrderId) -> Result<Vec<RetryCounter>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let counters = retry_counters::fetch_counters(order_id, &mut conn).await?;
        Ok(counters)
    }

    async fn fetch_payment_events(&self, payment_id: &PaymentId) -> Result<Vec<PaymentEvent>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let events = payment_events::fetch_events(payment_id, &mut conn).await?;
        Ok(events)
    }

    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        self.pool.close().await;
        Ok(())
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using the URL in `OPG_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, PaymentGatewayError> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    /// Connects to the database at `url`, creating it if necessary, and brings the schema up to date.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, PaymentGatewayError> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let db = Self { url: url.to_string(), pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// A fresh, private, migrated in-memory database.
    pub async fn new_in_memory() -> Result<Self, PaymentGatewayError> {
        let pool = new_memory_pool().await?;
        let db = Self { url: "sqlite::memory:".to_string(), pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), PaymentGatewayError> {
        migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PaymentGatewayError::DatabaseError(format!("Migrations failed: {e}")))?;
        debug!("🗃️ Migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
