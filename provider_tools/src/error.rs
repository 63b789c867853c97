use order_payment_engine::{db_types::ProviderCode, traits::ProviderError};
use thiserror::Error;

/// Errors raised by the raw REST layer. Adapters translate these into [`ProviderError`] before returning.
#[derive(Debug, Error)]
pub enum ProviderApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("The request timed out")]
    Timeout,
    #[error("Could not send the request: {0}")]
    Transport(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
}

impl ProviderApiError {
    pub fn into_provider_error(self, provider: ProviderCode) -> ProviderError {
        match self {
            Self::Timeout => ProviderError::Timeout(provider),
            Self::Initialization(message) | Self::Transport(message) => ProviderError::Transport { provider, message },
            Self::JsonError(message) => ProviderError::MalformedResponse { provider, message },
            // A server-side failure says nothing about whether the request took effect
            Self::QueryError { status, message } if status >= 500 => {
                ProviderError::Transport { provider, message: format!("HTTP {status}. {message}") }
            },
            Self::QueryError { status, message } => {
                ProviderError::Rejected { provider, message: format!("HTTP {status}. {}", error_message(&message)) }
            },
        }
    }
}

/// Pulls the human-readable message out of a provider's JSON error body, if there is one.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    value["error"]["message"].as_str().or_else(|| value["message"].as_str()).unwrap_or(body).to_string()
}
