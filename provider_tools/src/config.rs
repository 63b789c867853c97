use std::time::Duration;

use log::*;
use opg_common::{
    helpers::{env_parse, env_secret},
    Secret,
};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    pub api_url: String,
    pub secret_key: Secret<String>,
    /// The endpoint secret used to sign webhooks (`whsec_...`)
    pub webhook_secret: Secret<String>,
}

impl StripeConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.stripe.com";

    /// Returns `None` if no secret key has been configured.
    pub fn from_env() -> Option<Self> {
        let secret_key = env_secret("OPG_STRIPE_SECRET_KEY");
        if !secret_key.is_set() {
            return None;
        }
        let webhook_secret = env_secret("OPG_STRIPE_WEBHOOK_SECRET");
        if !webhook_secret.is_set() {
            warn!("🪛️ OPG_STRIPE_WEBHOOK_SECRET is not set. Signed Stripe webhooks will be rejected.");
        }
        let api_url = api_url("OPG_STRIPE_API_URL", Self::DEFAULT_API_URL);
        Some(Self { api_url, secret_key, webhook_secret })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaystackConfig {
    pub api_url: String,
    /// Also the key for webhook signatures
    pub secret_key: Secret<String>,
}

impl PaystackConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.paystack.co";

    pub fn from_env() -> Option<Self> {
        let secret_key = env_secret("OPG_PAYSTACK_SECRET_KEY");
        if !secret_key.is_set() {
            return None;
        }
        let api_url = api_url("OPG_PAYSTACK_API_URL", Self::DEFAULT_API_URL);
        Some(Self { api_url, secret_key })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlutterwaveConfig {
    pub api_url: String,
    pub secret_key: Secret<String>,
    /// The shared secret Flutterwave echoes in the `verif-hash` header
    pub webhook_hash: Secret<String>,
}

impl FlutterwaveConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.flutterwave.com";

    pub fn from_env() -> Option<Self> {
        let secret_key = env_secret("OPG_FLUTTERWAVE_SECRET_KEY");
        if !secret_key.is_set() {
            return None;
        }
        let webhook_hash = env_secret("OPG_FLUTTERWAVE_WEBHOOK_HASH");
        if !webhook_hash.is_set() {
            warn!("🪛️ OPG_FLUTTERWAVE_WEBHOOK_HASH is not set. Signed Flutterwave webhooks will be rejected.");
        }
        let api_url = api_url("OPG_FLUTTERWAVE_API_URL", Self::DEFAULT_API_URL);
        Some(Self { api_url, secret_key, webhook_hash })
    }
}

/// Configuration for every provider. A provider whose secret key is missing is not configured at all.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub stripe: Option<StripeConfig>,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
    /// Upper bound on every provider request
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { stripe: None, paystack: None, flutterwave: None, timeout: DEFAULT_PROVIDER_TIMEOUT }
    }
}

impl ProviderConfig {
    pub fn new_from_env_or_default() -> Self {
        let timeout = env_parse::<u64>("OPG_PROVIDER_TIMEOUT")
            .unwrap_or_else(|e| {
                warn!("🪛️ {e}. Using the default of {}s.", DEFAULT_PROVIDER_TIMEOUT.as_secs());
                None
            })
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
        let result = Self {
            stripe: StripeConfig::from_env(),
            paystack: PaystackConfig::from_env(),
            flutterwave: FlutterwaveConfig::from_env(),
            timeout,
        };
        if result.configured().is_empty() {
            warn!("🪛️ No payment provider is configured. Set at least one of the OPG_*_SECRET_KEY variables.");
        }
        result
    }

    /// The names of the providers that have been configured.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut names = vec![];
        if self.stripe.is_some() {
            names.push("stripe");
        }
        if self.paystack.is_some() {
            names.push("paystack");
        }
        if self.flutterwave.is_some() {
            names.push("flutterwave");
        }
        names
    }
}

fn api_url(var: &str, default: &str) -> String {
    std::env::var(var).ok().filter(|s| !s.trim().is_empty()).unwrap_or_else(|| default.to_string())
}
