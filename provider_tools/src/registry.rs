use std::sync::Arc;

use log::*;
use order_payment_engine::traits::ProviderRegistry;

use crate::{
    config::ProviderConfig,
    flutterwave::FlutterwaveAdapter,
    paystack::PaystackAdapter,
    stripe::StripeAdapter,
    ProviderApiError,
};

/// Builds an adapter for every configured provider.
pub fn build_registry(config: &ProviderConfig) -> Result<ProviderRegistry, ProviderApiError> {
    let mut registry = ProviderRegistry::new();
    if let Some(stripe) = &config.stripe {
        registry.register(Arc::new(StripeAdapter::new(stripe.clone(), config.timeout)?));
    }
    if let Some(paystack) = &config.paystack {
        registry.register(Arc::new(PaystackAdapter::new(paystack.clone(), config.timeout)?));
    }
    if let Some(flutterwave) = &config.flutterwave {
        registry.register(Arc::new(FlutterwaveAdapter::new(flutterwave.clone(), config.timeout)?));
    }
    info!("💳️ Payment providers enabled: {:?}", registry.providers());
    Ok(registry)
}
