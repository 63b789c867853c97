use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::db_types::{OrderId, ProviderCode, RetryCounter};

/// Counts a failed attempt against `provider` and resets the counters of every other provider for the order, so that
/// the counters only ever track *consecutive* failures.
pub async fn record_failure(
    order_id: &OrderId,
    provider: ProviderCode,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO retry_counters (order_id, provider, consecutive_failures, updated_at) VALUES ($1, $2, 1, $3)
            ON CONFLICT (order_id, provider) DO UPDATE SET
                consecutive_failures = consecutive_failures + 1,
                updated_at = excluded.updated_at;
        "#,
    )
    .bind(order_id)
    .bind(provider)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "UPDATE retry_counters SET consecutive_failures = 0, updated_at = $1 WHERE order_id = $2 AND provider <> $3 AND \
         consecutive_failures > 0",
    )
    .bind(now)
    .bind(order_id)
    .bind(provider)
    .execute(conn)
    .await?;
    trace!("🗃️ Recorded a {provider} failure for order {order_id}");
    Ok(())
}

pub async fn reset(order_id: &OrderId, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE retry_counters SET consecutive_failures = 0, updated_at = $1 WHERE order_id = $2 AND \
         consecutive_failures > 0",
    )
    .bind(now)
    .bind(order_id)
    .execute(conn)
    .await?;
    trace!("🗃️ Retry counters cleared for order {order_id}");
    Ok(())
}

pub async fn fetch_counters(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<RetryCounter>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM retry_counters WHERE order_id = $1 ORDER BY provider")
        .bind(order_id)
        .fetch_all(conn)
        .await
}
