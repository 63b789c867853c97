use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db_types::{PaymentEvent, PaymentId, PaymentStatus},
    traits::PaymentUpdate,
};

pub async fn insert_event(
    update: &PaymentUpdate,
    old_status: PaymentStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentEvent, sqlx::Error> {
    sqlx::query_as(
        r#"
            INSERT INTO payment_events (
                payment_id,
                old_status,
                new_status,
                source,
                provider_status,
                note,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(&update.payment_id)
    .bind(old_status)
    .bind(update.new_status)
    .bind(update.source)
    .bind(update.provider_status.as_deref())
    .bind(update.note.as_deref())
    .bind(now)
    .fetch_one(conn)
    .await
}

/// The audit trail of a payment, oldest first.
pub async fn fetch_events(payment_id: &PaymentId, conn: &mut SqliteConnection) -> Result<Vec<PaymentEvent>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payment_events WHERE payment_id = $1 ORDER BY id ASC")
        .bind(payment_id)
        .fetch_all(conn)
        .await
}
