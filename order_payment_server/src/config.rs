use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use log::*;
use opg_common::{
    helpers::{env_flag, env_parse, env_secret},
    Secret,
    DEFAULT_CURRENCY_CODE,
};
use order_payment_engine::{OrderFlowConfig, DEFAULT_ALTERNATE_PROVIDER_THRESHOLD};
use provider_tools::ProviderConfig;

const DEFAULT_OPG_HOST: &str = "127.0.0.1";
const DEFAULT_OPG_PORT: u16 = 8360;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/opg_store.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 1;
const DEFAULT_RECONCILIATION_INTERVAL: Duration = Duration::seconds(60);
const DEFAULT_RECONCILIATION_THRESHOLD: Duration = Duration::minutes(15);
const DEFAULT_RECONCILIATION_BATCH_SIZE: i64 = 50;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Currency used for orders that do not name one
    pub default_currency: String,
    /// When false, webhook signatures are not checked at all. Only ever turn this off in testing.
    pub webhook_signature_checks: bool,
    /// Bearer token for the administrative endpoints. Administrative endpoints are disabled if it is not set.
    pub admin_token: Secret<String>,
    pub order_flow: OrderFlowConfig,
    pub reconciliation: ReconciliationConfig,
    pub providers: ProviderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let order_flow = OrderFlowConfig {
            public_url: format!("http://{DEFAULT_OPG_HOST}:{DEFAULT_OPG_PORT}"),
            ..Default::default()
        };
        Self {
            host: DEFAULT_OPG_HOST.to_string(),
            port: DEFAULT_OPG_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            default_currency: DEFAULT_CURRENCY_CODE.to_string(),
            webhook_signature_checks: true,
            admin_token: Secret::default(),
            order_flow,
            reconciliation: ReconciliationConfig::default(),
            providers: ProviderConfig::default(),
        }
    }
}

/// How the reconciliation worker sweeps for payments that have been pending for too long.
#[derive(Clone, Debug)]
pub struct ReconciliationConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// How long a payment must have been pending before the provider is re-queried
    pub threshold: Duration,
    /// Upper bound on the number of payments examined per sweep
    pub batch_size: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILIATION_INTERVAL,
            threshold: DEFAULT_RECONCILIATION_THRESHOLD,
            batch_size: DEFAULT_RECONCILIATION_BATCH_SIZE,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        let interval = env_or_default("OPG_RECONCILIATION_INTERVAL", defaults.interval.num_seconds());
        let threshold = env_or_default("OPG_RECONCILIATION_THRESHOLD", defaults.threshold.num_seconds());
        let batch_size = env_or_default("OPG_RECONCILIATION_BATCH_SIZE", defaults.batch_size);
        let result = Self {
            interval: Duration::seconds(interval.max(1)),
            threshold: Duration::seconds(threshold.max(0)),
            batch_size: batch_size.max(1),
        };
        info!(
            "🪛️ Reconciliation runs every {}s on payments pending for more than {}s, {} at a time",
            result.interval.num_seconds(),
            result.threshold.num_seconds(),
            result.batch_size
        );
        result
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("OPG_HOST").ok().unwrap_or_else(|| DEFAULT_OPG_HOST.into());
        let port = env_or_default("OPG_PORT", DEFAULT_OPG_PORT);
        let database_url = env::var("OPG_DATABASE_URL").ok().filter(|s| !s.trim().is_empty()).unwrap_or_else(|| {
            warn!("🪛️ OPG_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.into()
        });
        let db_max_connections = env_or_default("OPG_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS).max(1);
        let public_url = env::var("OPG_PUBLIC_URL").ok().filter(|s| !s.trim().is_empty()).unwrap_or_else(|| {
            let url = format!("http://{host}:{port}");
            warn!(
                "🪛️ OPG_PUBLIC_URL is not set. Payment providers will send buyers back to {url}, which is probably not \
                 reachable from the outside."
            );
            url
        });
        let alternate_provider_threshold =
            env_or_default("OPG_ALTERNATE_PROVIDER_THRESHOLD", DEFAULT_ALTERNATE_PROVIDER_THRESHOLD).max(1);
        let order_flow = OrderFlowConfig {
            public_url: public_url.trim_end_matches('/').to_string(),
            alternate_provider_threshold,
            ..Default::default()
        };
        let default_currency = env::var("OPG_DEFAULT_CURRENCY")
            .ok()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| {
                let valid = s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic());
                if !valid {
                    warn!("🪛️ {s} is not a valid currency code for OPG_DEFAULT_CURRENCY. Using {DEFAULT_CURRENCY_CODE}.");
                }
                valid
            })
            .unwrap_or_else(|| DEFAULT_CURRENCY_CODE.into());
        let webhook_signature_checks = env_flag("OPG_WEBHOOK_SIGNATURE_CHECKS", true);
        if !webhook_signature_checks {
            warn!("🚨️ Webhook signature checks are DISABLED. Anyone can trigger a status check for any payment.");
        }
        let admin_token = env_secret("OPG_ADMIN_TOKEN");
        if !admin_token.is_set() {
            warn!("🪛️ OPG_ADMIN_TOKEN is not set. The administrative endpoints are disabled.");
        }
        Self {
            host,
            port,
            database_url,
            db_max_connections,
            default_currency,
            webhook_signature_checks,
            admin_token,
            order_flow,
            reconciliation: ReconciliationConfig::from_env_or_default(),
            providers: ProviderConfig::new_from_env_or_default(),
        }
    }
}

/// Settings the route handlers need at request time.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    pub default_currency: String,
    pub webhook_signature_checks: bool,
    pub admin_token: Secret<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            default_currency: DEFAULT_CURRENCY_CODE.to_string(),
            webhook_signature_checks: true,
            admin_token: Secret::default(),
        }
    }
}

impl From<&ServerConfig> for RequestOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            default_currency: config.default_currency.clone(),
            webhook_signature_checks: config.webhook_signature_checks,
            admin_token: config.admin_token.clone(),
        }
    }
}

fn env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    env_parse::<T>(name)
        .unwrap_or_else(|e| {
            error!("🪛️ {e}. Using the default, {default}, instead.");
            None
        })
        .unwrap_or(default)
}
