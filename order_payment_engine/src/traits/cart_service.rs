use async_trait::async_trait;
use opg_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{line_items_subtotal, LineItem};

/// A priced snapshot of a buyer's cart, as reported by the catalog/cart collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub line_items: Vec<LineItem>,
    pub subtotal: Money,
}

impl CartTotals {
    /// True if `subtotal` equals the sum of the line totals. A cart whose lines cannot be summed is never consistent.
    pub fn is_consistent(&self) -> bool {
        line_items_subtotal(&self.line_items).is_ok_and(|sum| sum == self.subtotal)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CartServiceError {
    #[error("No cart found for {0}")]
    CartNotFound(String),
    #[error("The cart service is unavailable. {0}")]
    Unavailable(String),
}

/// Read-only access to the catalog/cart collaborator. Called once when an order is created from a cart.
#[async_trait]
pub trait CartService: Send + Sync {
    async fn get_cart_totals(&self, user_ref: &str) -> Result<CartTotals, CartServiceError>;
}
