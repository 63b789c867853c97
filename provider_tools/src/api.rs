use std::{sync::Arc, time::Duration};

use log::*;
use opg_common::Secret;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
    Method,
    RequestBuilder,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::ProviderApiError;

/// A thin REST client for one provider: a base URL, a bearer secret key and a request timeout.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    client: Arc<Client>,
}

impl RestClient {
    pub fn new(base_url: &str, secret_key: &Secret<String>, timeout: Duration) -> Result<Self, ProviderApiError> {
        let mut headers = HeaderMap::with_capacity(1);
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", secret_key.reveal()))
            .map_err(|e| ProviderApiError::Initialization(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderApiError::Initialization(e.to_string()))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends a request with an optional JSON body.
    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<B>,
    ) -> Result<T, ProviderApiError> {
        let mut req = self.request(method, path, params);
        if let Some(body) = body {
            req = req.json(&body);
        }
        self.send(req).await
    }

    /// Sends a request with a form-encoded body.
    pub async fn form_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, ProviderApiError> {
        let req = self.request(method, path, &[]).form(form);
        self.send(req).await
    }

    fn request(&self, method: Method, path: &str, params: &[(&str, &str)]) -> RequestBuilder {
        let url = self.url(path);
        trace!("Sending REST query: {method} {url}");
        let mut req = self.client.request(method, url);
        if !params.is_empty() {
            req = req.query(params);
        }
        req
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ProviderApiError> {
        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            trace!("REST query successful. {status}");
            let body = response.bytes().await.map_err(transport_error)?;
            serde_json::from_slice::<T>(&body).map_err(|e| ProviderApiError::JsonError(e.to_string()))
        } else {
            let message = response.text().await.map_err(transport_error)?;
            debug!("REST query failed. {status}: {message}");
            Err(ProviderApiError::QueryError { status: status.as_u16(), message })
        }
    }
}

fn transport_error(e: reqwest::Error) -> ProviderApiError {
    if e.is_timeout() {
        ProviderApiError::Timeout
    } else {
        ProviderApiError::Transport(e.to_string())
    }
}
