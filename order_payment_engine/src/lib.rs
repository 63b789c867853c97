//! Order Payment Engine
//!
//! The order payment engine turns a buyer's cart into a confirmed, paid order by coordinating with one of several
//! interchangeable external payment providers. It keeps order and payment state consistent while the buyer's browser,
//! this system and the provider talk to each other asynchronously and occasionally disagree.
//!
//! The library is divided into the following sections:
//! 1. Data types ([`mod@db_types`]): orders, payments, their status machines, and the audit trail.
//! 2. Backend contracts ([`mod@traits`]): the storage trait, the Provider Adapter trait and registry, and the cart
//!    service collaborator. SQLite is the supplied storage backend.
//! 3. The public API ([`OrderFlowApi`], [`CallbackResolver`], [`ReconciliationApi`]). The order flow API is the
//!    orchestrator; the other two feed provider findings into its single `settle` path.
//!
//! The engine also publishes events when orders and payments change status, or when the provider and the local
//! records disagree. See [`mod@events`] for how to hook into them.
pub mod db_types;
pub mod events;
pub mod helpers;
mod ope_api;
#[cfg(feature = "sqlite")]
mod sqlite;
pub mod traits;

pub use ope_api::{
    callback_resolver::CallbackResolver,
    errors::{ErrorKind, OrchestratorError},
    order_flow_api::{OrderFlowApi, OrderFlowConfig, DEFAULT_ALTERNATE_PROVIDER_THRESHOLD},
    order_objects,
    payment_objects,
    reconciliation_api::ReconciliationApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
