use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use super::is_unique_violation;
use crate::{
    db_types::{NewPayment, OrderId, Payment, PaymentId, PaymentStatus, ProviderCode},
    traits::{PaymentGatewayError, PaymentUpdate},
};

/// Reserves a `pending` payment attempt. The partial unique index on `payments(order_id)` rejects a second pending
/// attempt for the same order, which is reported as [`PaymentGatewayError::ActivePaymentExists`].
pub async fn insert_pending_payment(
    payment: NewPayment,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Payment, PaymentGatewayError> {
    let result = sqlx::query_as(
        r#"
            INSERT INTO payments (
                payment_id,
                order_id,
                provider,
                amount,
                currency,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *;
        "#,
    )
    .bind(&payment.payment_id)
    .bind(&payment.order_id)
    .bind(payment.provider)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(PaymentStatus::Pending)
    .bind(now)
    .fetch_one(conn)
    .await;
    match result {
        Ok(p) => {
            debug!("🗃️ Payment {} reserved for order {} via {}", payment.payment_id, payment.order_id, payment.provider);
            Ok(p)
        },
        Err(e) if is_unique_violation(&e) => Err(PaymentGatewayError::ActivePaymentExists(payment.order_id)),
        Err(e) => Err(e.into()),
    }
}

pub async fn attach_session(
    payment_id: &PaymentId,
    external_reference: &str,
    checkout_url: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Payment, PaymentGatewayError> {
    let result: Result<Option<Payment>, sqlx::Error> = sqlx::query_as(
        r#"
            UPDATE payments SET external_reference = $1, checkout_url = $2, updated_at = $3
            WHERE payment_id = $4 AND status = $5
            RETURNING *;
        "#,
    )
    .bind(external_reference)
    .bind(checkout_url)
    .bind(now)
    .bind(payment_id)
    .bind(PaymentStatus::Pending)
    .fetch_optional(&mut *conn)
    .await;
    match result {
        Ok(Some(payment)) => {
            trace!("🗃️ Payment {payment_id} linked to {} reference {external_reference}", payment.provider);
            Ok(payment)
        },
        Ok(None) => match fetch_payment(payment_id, conn).await? {
            None => Err(PaymentGatewayError::PaymentNotFound(payment_id.clone())),
            Some(p) => Err(PaymentGatewayError::PaymentStatusChanged {
                payment_id: payment_id.clone(),
                expected: PaymentStatus::Pending,
                actual: p.status,
            }),
        },
        Err(e) if is_unique_violation(&e) => Err(PaymentGatewayError::DuplicateReference(external_reference.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_payment(payment_id: &PaymentId, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE payment_id = $1").bind(payment_id).fetch_optional(conn).await
}

pub async fn fetch_payment_by_reference(
    provider: ProviderCode,
    external_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE provider = $1 AND external_reference = $2")
        .bind(provider)
        .bind(external_reference)
        .fetch_optional(conn)
        .await
}

/// All payment attempts for the order, most recent first.
pub async fn fetch_payments_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE order_id = $1 ORDER BY id DESC").bind(order_id).fetch_all(conn).await
}

/// Selects up to `limit` pending payments created before `created_before` and stamps them with `checked_at`.
///
/// Payments that have never been checked come first (SQLite sorts NULL before any value), then the least recently
/// checked. Ties go to the oldest payment. The result is in creation order.
pub async fn claim_stale_pending_payments(
    created_before: DateTime<Utc>,
    checked_at: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    let mut payments: Vec<Payment> = sqlx::query_as(
        r#"
            UPDATE payments SET last_checked_at = $1
            WHERE id IN (
                SELECT id FROM payments
                WHERE status = $2 AND created_at < $3
                ORDER BY last_checked_at ASC, created_at ASC, id ASC
                LIMIT $4
            )
            RETURNING *;
        "#,
    )
    .bind(checked_at)
    .bind(PaymentStatus::Pending)
    .bind(created_before)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    payments.sort_by_key(|p| p.id);
    Ok(payments)
}

/// Compare-and-set status update. Returns `None` if the payment no longer has `update.expected_status`.
pub(crate) async fn update_payment_status(
    update: &PaymentUpdate,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let paid_at = (update.new_status == PaymentStatus::Completed).then_some(now);
    sqlx::query_as(
        r#"
            UPDATE payments SET
                status = $1,
                failure_reason = COALESCE($2, failure_reason),
                paid_at = COALESCE($3, paid_at),
                updated_at = $4
            WHERE payment_id = $5 AND status = $6
            RETURNING *;
        "#,
    )
    .bind(update.new_status)
    .bind(update.failure_reason.as_deref())
    .bind(paid_at)
    .bind(now)
    .bind(&update.payment_id)
    .bind(update.expected_status)
    .fetch_optional(conn)
    .await
}
