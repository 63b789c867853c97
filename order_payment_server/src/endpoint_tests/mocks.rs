use std::{collections::HashMap, fmt::Debug};

use async_trait::async_trait;
use mockall::automock;
use order_payment_engine::{
    db_types::ProviderCode,
    traits::{
        ProviderAdapter,
        ProviderError,
        ProviderReturn,
        ProviderSession,
        ProviderStatus,
        SessionRequest,
        WebhookNotice,
    },
};

pub const SIGNATURE_HEADER: &str = "x-test-signature";

/// The provider calls the endpoint tests script. Arguments are owned so that expectations are easy to write.
#[automock]
pub trait ProviderCalls {
    fn create_session(&self, request: SessionRequest) -> Result<ProviderSession, ProviderError>;
    fn parse_return(&self, params: HashMap<String, String>) -> Result<ProviderReturn, ProviderError>;
    fn parse_webhook(&self, body: Vec<u8>) -> Result<WebhookNotice, ProviderError>;
    fn verify_webhook(&self, body: Vec<u8>, signature: Option<String>) -> Result<(), ProviderError>;
    fn fetch_status(&self, reference: String) -> Result<ProviderStatus, ProviderError>;
}

/// A provider adapter whose behaviour is entirely defined by a [`MockProviderCalls`].
pub struct MockedProvider {
    provider: ProviderCode,
    calls: MockProviderCalls,
}

impl MockedProvider {
    pub fn new(provider: ProviderCode, calls: MockProviderCalls) -> Self {
        Self { provider, calls }
    }
}

impl Debug for MockedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockedProvider({})", self.provider)
    }
}

#[async_trait]
impl ProviderAdapter for MockedProvider {
    fn provider(&self) -> ProviderCode {
        self.provider
    }

    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession, ProviderError> {
        self.calls.create_session(request)
    }

    fn parse_return(&self, params: &HashMap<String, String>) -> Result<ProviderReturn, ProviderError> {
        self.calls.parse_return(params.clone())
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookNotice, ProviderError> {
        self.calls.parse_webhook(body.to_vec())
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<(), ProviderError> {
        self.calls.verify_webhook(body.to_vec(), signature.map(String::from))
    }

    async fn fetch_status(&self, external_reference: &str) -> Result<ProviderStatus, ProviderError> {
        self.calls.fetch_status(external_reference.to_string())
    }

    fn amount_is_minor_units(&self, _currency: &str) -> bool {
        true
    }
}
