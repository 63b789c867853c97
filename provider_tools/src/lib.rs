//! Payment provider integrations.
//!
//! One [`ProviderAdapter`](order_payment_engine::traits::ProviderAdapter) per supported provider, each speaking that
//! provider's REST API. Call [`build_registry`] with a [`ProviderConfig`] to get a registry holding every configured
//! provider.
mod api;
mod config;
mod error;
mod helpers;
mod registry;

pub mod flutterwave;
pub mod paystack;
pub mod stripe;

pub use api::RestClient;
pub use config::{FlutterwaveConfig, PaystackConfig, ProviderConfig, StripeConfig, DEFAULT_PROVIDER_TIMEOUT};
pub use error::ProviderApiError;
pub use flutterwave::FlutterwaveAdapter;
pub use helpers::{constant_time_eq, hmac_sha256_hex, hmac_sha512_hex};
pub use paystack::PaystackAdapter;
pub use registry::build_registry;
pub use stripe::StripeAdapter;
