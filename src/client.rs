//! PingOne management API client.
//!
//! An [`ApiClient`] is an explicit handle built once per invocation from a
//! token provider. Clearing credentials does not touch it; build a new one
//! after logging in again.

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::sync::Arc;
use tracing::debug;

use crate::oauth::grant::Region;
use crate::oauth::{AuthError, AuthSession, TokenProvider};

/// Authenticated client for the regional PingOne API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    source: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(region: Region, source: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: region.api_base(),
            source,
        }
    }

    /// Resolve a valid token through `session` and build a client for the configured region.
    pub async fn from_session(session: &AuthSession) -> Result<Self, AuthError> {
        let region = Region::configured(session.settings())?;
        let source = session.get_valid_token_source().await?;
        Ok(Self::new(region, Arc::new(source)))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request for `path`, relative to the API base, with the bearer header set.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, AuthError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let authorization = self.source.authorization_header().await?;
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, "application/json"))
    }

    /// GET `path` and return the JSON body.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value, AuthError> {
        let response = self.request(Method::GET, path).await?.send().await?;
        let status = response.status();
        debug!(path, status = status.as_u16(), "API response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
