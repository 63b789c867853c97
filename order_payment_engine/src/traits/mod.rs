//! # Backend and collaborator contracts
//!
//! The engine is agnostic of where its data lives and of which payment providers are in play. This module defines the
//! interfaces that the concrete implementations need to satisfy.
//!
//! * [`PaymentGatewayDatabase`] defines the storage behaviour the orchestrator relies on. Every status write it
//!   exposes is compare-and-set, so that a lost race is reported rather than silently overwritten.
//! * [`ProviderAdapter`] translates between the canonical payment vocabulary and a specific provider's API. Adapters
//!   are looked up by [`ProviderCode`](crate::db_types::ProviderCode) in a [`ProviderRegistry`].
//! * [`CartService`] is the read-only view of the catalog/cart collaborator used when an order is created from a
//!   buyer's cart.
mod cart_service;
mod data_objects;
mod payment_gateway_database;
mod provider_adapter;

pub use cart_service::{CartService, CartServiceError, CartTotals};
pub use data_objects::{PaymentUpdate, PaymentUpdateResult, RetryCounterAction};
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
pub use provider_adapter::{
    OutcomeHint,
    ProviderAdapter,
    ProviderError,
    ProviderRegistry,
    ProviderReturn,
    ProviderSession,
    ProviderStatus,
    ReturnReference,
    ReturnUrls,
    SessionRequest,
    WebhookNotice,
};
