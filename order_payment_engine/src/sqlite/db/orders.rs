use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::de::DeserializeOwned;
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};

use super::is_unique_violation;
use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatusType},
    order_objects::OrderChanged,
    traits::PaymentGatewayError,
};

fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode { index: column.to_string(), source: Box::new(e) })
}

impl FromRow<'_, SqliteRow> for Order {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            customer_ref: row.try_get("customer_ref")?,
            line_items: json_column(row, "line_items")?,
            shipping_address: json_column(row, "shipping_address")?,
            billing_address: json_column(row, "billing_address")?,
            shipping_cost: row.try_get("shipping_cost")?,
            total_price: row.try_get("total_price")?,
            currency: row.try_get("currency")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Inserts a new order into the database using the given connection. The total price is computed here, once, and
/// never written again.
pub async fn insert_order(
    order_id: OrderId,
    order: NewOrder,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, PaymentGatewayError> {
    let total_price = order.total_price()?;
    let line_items = serde_json::to_string(&order.line_items)?;
    let shipping_address = serde_json::to_string(&order.shipping_address)?;
    let billing_address = serde_json::to_string(&order.billing_address)?;
    let result = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                customer_ref,
                line_items,
                shipping_address,
                billing_address,
                shipping_cost,
                total_price,
                currency,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *;
        "#,
    )
    .bind(&order_id)
    .bind(order.customer_ref)
    .bind(line_items)
    .bind(shipping_address)
    .bind(billing_address)
    .bind(order.shipping_cost)
    .bind(total_price)
    .bind(order.currency)
    .bind(OrderStatusType::Pending)
    .bind(now)
    .fetch_one(conn)
    .await;
    match result {
        Ok(order) => {
            debug!("🗃️ Order [{order_id}] inserted");
            Ok(order)
        },
        Err(e) if is_unique_violation(&e) => Err(PaymentGatewayError::OrderAlreadyExists(order_id)),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

/// Compare-and-set status update. The order is only changed if it still has the `from` status.
pub(crate) async fn update_order_status(
    order_id: &OrderId,
    from: OrderStatusType,
    to: OrderStatusType,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<OrderChanged, PaymentGatewayError> {
    let old_order =
        fetch_order(order_id, &mut *conn).await?.ok_or_else(|| PaymentGatewayError::OrderNotFound(order_id.clone()))?;
    if old_order.status != from {
        trace!("🗃️ Order {order_id} is {} rather than {from}. Not updating", old_order.status);
        return Err(PaymentGatewayError::OrderStatusChanged {
            order_id: order_id.clone(),
            expected: from,
            actual: old_order.status,
        });
    }
    let new_order: Option<Order> = sqlx::query_as(
        "UPDATE orders SET status = $1, updated_at = $2 WHERE order_id = $3 AND status = $4 RETURNING *",
    )
    .bind(to)
    .bind(now)
    .bind(order_id)
    .bind(from)
    .fetch_optional(&mut *conn)
    .await?;
    match new_order {
        Some(new_order) => {
            debug!("🗃️ Order {order_id} status changed from {from} to {to}");
            Ok(OrderChanged::new(old_order, new_order))
        },
        None => {
            let actual = fetch_order(order_id, conn).await?.map(|o| o.status).unwrap_or(old_order.status);
            Err(PaymentGatewayError::OrderStatusChanged { order_id: order_id.clone(), expected: from, actual })
        },
    }
}
