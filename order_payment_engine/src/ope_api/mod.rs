//! # Order payment engine public API
//!
//! * [`order_flow_api`] is the payment orchestrator: order creation, payment sessions, buyer cancels, administrative
//!   actions and the `settle` operation that reconciles provider findings into local state.
//! * [`callback_resolver`] identifies the payment behind a provider return URL or webhook and settles the provider's
//!   authoritative status for it.
//! * [`reconciliation_api`] re-queries payments that have been pending for too long.
//!
//! All three are built from a database backend and a [`ProviderRegistry`](crate::traits::ProviderRegistry):
//!
//! ```rust,ignore
//! let db = SqliteDatabase::new_with_url(url, 1).await?;
//! let api = OrderFlowApi::new(db, providers, producers);
//! let order = api.create_order(new_order).await?;
//! let session = api.open_session(&order.order_id, ProviderCode::Stripe).await?;
//! // redirect the buyer to session.checkout_url
//! ```
pub mod callback_resolver;
pub mod errors;
pub mod order_flow_api;
pub mod order_objects;
pub mod payment_objects;
pub mod reconciliation_api;
