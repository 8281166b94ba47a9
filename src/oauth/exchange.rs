//! OAuth2 token exchange against the PingOne authorization server.
//!
//! [`TokenExchange`] is the seam the login orchestrator calls. The HTTP
//! implementation reuses a still-valid cached token for the configuration's
//! slot, otherwise runs the grant's flow and persists the new token:
//!
//! - `client_credentials`: one POST to the token endpoint with HTTP Basic auth
//! - `device_code`: RFC 8628 device authorization, then polling
//! - `auth_code`: PKCE (S256) with a loopback redirect listener

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::AuthError;
use super::callback;
use super::grant::{GrantConfig, GrantMethod};
use super::pkce::Pkce;
use super::selector::StorageSelector;
use super::token::{TokenInfo, expiry_after};
use crate::config::keys;

/// Receives user-facing prompts (device codes, authorize URLs).
pub type Notifier = Arc<dyn Fn(&str) + Send + Sync>;

/// Source of "now" for expiry checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Notifier that prints to stderr, keeping stdout for command output.
pub fn stderr_notifier() -> Notifier {
    Arc::new(|message: &str| eprintln!("{message}"))
}

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// RFC 8628 default polling interval.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Added to the polling interval on every `slow_down`.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Obtains a token for a built grant configuration.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn token(&self, config: &GrantConfig) -> Result<TokenInfo, AuthError>;
}

/// Token endpoint response, success or OAuth error.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_token(self, now: DateTime<Utc>) -> Result<TokenInfo, AuthError> {
        let access_token = self.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AuthError::ExchangeFailed("token response did not include an access token".into())
        })?;
        let expiry = match self.expires_in {
            Some(secs) => Some(expiry_after(now, secs).ok_or_else(|| {
                AuthError::ExchangeFailed(format!("invalid expires_in in token response: {secs}"))
            })?),
            None => None,
        };
        let token = TokenInfo::with_expiry(access_token, self.refresh_token, expiry);
        Ok(match self.token_type {
            Some(token_type) => token.with_token_type(token_type),
            None => token,
        })
    }

    fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|error| match &self.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        })
    }
}

/// Device authorization response (RFC 8628 section 3.2).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Outcome of one device-code poll.
#[derive(Debug)]
enum PollResult {
    Pending,
    SlowDown,
    Complete(TokenInfo),
}

/// [`TokenExchange`] over HTTP.
#[derive(Clone)]
pub struct HttpTokenExchange {
    http: reqwest::Client,
    store: StorageSelector,
    notifier: Notifier,
    clock: Clock,
    callback_timeout: Duration,
}

impl HttpTokenExchange {
    pub fn new(store: StorageSelector) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            notifier: stderr_notifier(),
            clock: system_clock(),
            callback_timeout: callback::CALLBACK_TIMEOUT,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    fn notify(&self, message: &str) {
        (self.notifier)(message);
    }

    /// Still-valid cached token for `slot`, if any. Load failures count as a miss.
    fn cached(&self, slot: &str) -> Option<TokenInfo> {
        match self.store.load(slot) {
            Ok(Some(token)) if token.is_valid_at((self.clock)()) => Some(token),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Cached token unavailable");
                None
            }
        }
    }

    async fn post_token_request(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<TokenInfo, AuthError> {
        let response = request.header(ACCEPT, "application/json").send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::ExchangeFailed(format!(
                "unexpected token response (HTTP {}): {e}",
                status.as_u16()
            ))
        })?;
        if let Some(message) = parsed.error_message() {
            return Err(AuthError::ExchangeFailed(message));
        }
        if !status.is_success() {
            return Err(AuthError::ExchangeFailed(format!(
                "token request failed (HTTP {}): {body}",
                status.as_u16()
            )));
        }
        parsed.into_token((self.clock)())
    }

    async fn client_credentials(&self, config: &GrantConfig) -> Result<TokenInfo, AuthError> {
        let mut form = vec![("grant_type", config.grant_type.to_string())];
        if let Some(scope) = config.scope_param() {
            form.push(("scope", scope));
        }

        debug!(token_url = %config.token_url(), "Requesting client credentials token");
        let request = self
            .http
            .post(config.token_url())
            .basic_auth(&config.client_id, config.client_secret.as_deref())
            .form(&form);
        self.post_token_request(request).await
    }

    /// Start the device flow and return the code the user must enter.
    pub async fn request_device_authorization(
        &self,
        config: &GrantConfig,
    ) -> Result<DeviceAuthorization, AuthError> {
        let mut form = vec![("client_id", config.client_id.clone())];
        if let Some(scope) = config.scope_param() {
            form.push(("scope", scope));
        }

        let response = self
            .http
            .post(config.device_authorization_url())
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::ExchangeFailed(format!(
                "device authorization failed (HTTP {}): {body}",
                status.as_u16()
            )));
        }

        let authorization: DeviceAuthorization = serde_json::from_str(&body).map_err(|e| {
            AuthError::ExchangeFailed(format!("failed to parse device authorization: {e}"))
        })?;
        debug!(
            verification_uri = %authorization.verification_uri,
            expires_in = authorization.expires_in,
            interval = ?authorization.interval,
            "Device code obtained"
        );
        Ok(authorization)
    }

    async fn poll_device_token(
        &self,
        config: &GrantConfig,
        device_code: &str,
    ) -> Result<PollResult, AuthError> {
        let response = self
            .http
            .post(config.token_url())
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", config.grant_type),
                ("device_code", device_code),
                ("client_id", config.client_id.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::ExchangeFailed(format!(
                "unexpected poll response (HTTP {}): {e}",
                status.as_u16()
            ))
        })?;

        match parsed.error.as_deref() {
            None => parsed.into_token((self.clock)()).map(PollResult::Complete),
            Some("authorization_pending") => Ok(PollResult::Pending),
            Some("slow_down") => Ok(PollResult::SlowDown),
            Some("expired_token") => Err(AuthError::FlowExpired),
            Some("access_denied") => Err(AuthError::ExchangeFailed(
                "user denied the authorization request".into(),
            )),
            Some(_) => Err(AuthError::ExchangeFailed(
                parsed.error_message().unwrap_or_default(),
            )),
        }
    }

    async fn device_code(&self, config: &GrantConfig) -> Result<TokenInfo, AuthError> {
        let authorization = self.request_device_authorization(config).await?;
        let prompt = match &authorization.verification_uri_complete {
            Some(complete) => format!(
                "To authenticate, open {complete}\nor visit {} and enter the code: {}",
                authorization.verification_uri, authorization.user_code
            ),
            None => format!(
                "To authenticate, visit {} and enter the code: {}",
                authorization.verification_uri, authorization.user_code
            ),
        };
        self.notify(&prompt);

        let mut interval = Duration::from_secs(
            authorization
                .interval
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        );
        let deadline = tokio::time::Instant::now()
            .checked_add(Duration::from_secs(authorization.expires_in))
            .ok_or_else(|| {
                AuthError::ExchangeFailed(format!(
                    "invalid expires_in in device authorization: {}",
                    authorization.expires_in
                ))
            })?;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(AuthError::FlowExpired);
            }
            tokio::time::sleep(interval).await;

            match self
                .poll_device_token(config, &authorization.device_code)
                .await?
            {
                PollResult::Complete(token) => return Ok(token),
                PollResult::Pending => debug!("Device authorization pending"),
                PollResult::SlowDown => {
                    interval = interval.saturating_add(SLOW_DOWN_STEP);
                    debug!(?interval, "Slowing down device polling");
                }
            }
        }
    }

    /// Authorization URL the user opens in a browser.
    pub fn authorization_url(
        &self,
        config: &GrantConfig,
        redirect_uri: &str,
        pkce: &Pkce,
    ) -> Result<url::Url, AuthError> {
        let mut url = url::Url::parse(&config.authorize_url())
            .map_err(|e| AuthError::ExchangeFailed(format!("invalid authorize URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &config.client_id)
                .append_pair("redirect_uri", redirect_uri);
            if let Some(scope) = config.scope_param() {
                query.append_pair("scope", &scope);
            }
            for (name, value) in pkce.authorization_params() {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn auth_code(&self, config: &GrantConfig) -> Result<TokenInfo, AuthError> {
        let redirect_uri = config
            .redirect_uri
            .as_deref()
            .ok_or(AuthError::RedirectUriNotConfigured {
                key: keys::AUTH_CODE_REDIRECT_URI,
            })?;
        let target = callback::parse_redirect_uri(redirect_uri)?;
        let listener = callback::bind(&target).await?;

        let pkce = Pkce::generate();
        let url = self.authorization_url(config, redirect_uri, &pkce)?;
        self.notify(&format!(
            "Open the following URL in your browser to authenticate:\n{url}"
        ));

        let params =
            callback::wait_for_callback(&listener, &target.path, self.callback_timeout).await?;
        if let Some(error) = params.error {
            let detail = params
                .error_description
                .map(|d| format!("{error}: {d}"))
                .unwrap_or(error);
            return Err(AuthError::ExchangeFailed(format!(
                "authorization denied: {detail}"
            )));
        }
        if !pkce.state_matches(params.state.as_deref().unwrap_or_default()) {
            return Err(AuthError::InvalidState);
        }
        let code = params.code.filter(|c| !c.is_empty()).ok_or_else(|| {
            AuthError::ExchangeFailed("authorization callback did not include a code".into())
        })?;

        let request = self.http.post(config.token_url()).form(&[
            ("grant_type", config.grant_type),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri),
            ("client_id", config.client_id.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ]);
        self.post_token_request(request).await
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn token(&self, config: &GrantConfig) -> Result<TokenInfo, AuthError> {
        let slot = config.slot_key()?;
        if let Some(token) = self.cached(&slot) {
            debug!(method = %config.method, slot, "Reusing cached token");
            return Ok(token);
        }

        let token = match config.method {
            GrantMethod::ClientCredentials => self.client_credentials(config).await?,
            GrantMethod::DeviceCode => self.device_code(config).await?,
            GrantMethod::AuthorizationCode => self.auth_code(config).await?,
        };

        self.store.save(&slot, &token)?;
        info!(method = %config.method, "Obtained new access token");
        Ok(token)
    }
}
