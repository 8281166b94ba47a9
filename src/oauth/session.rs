//! Process-scoped authentication context.
//!
//! An [`AuthSession`] is built once per CLI invocation and passed to whatever
//! needs a token. It resolves a valid token source for the configured grant
//! method, and backs the `login`, `logout` and `status` commands.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::exchange::{
    Clock, HttpTokenExchange, Notifier, TokenExchange, stderr_notifier, system_clock,
};
use super::grant::{GrantMethod, GrantStrategy};
use super::login::{LoginOutcome, login};
use super::selector::StorageSelector;
use super::token::TokenInfo;
use super::{AuthError, TokenProvider};
use crate::config::ConfigSource;

// =============================================================================
// StaticTokenSource
// =============================================================================

/// A token accessor over one already-obtained token. Never re-authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticTokenSource {
    token: TokenInfo,
}

impl StaticTokenSource {
    pub fn new(token: TokenInfo) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &TokenInfo {
        &self.token
    }
}

#[async_trait]
impl TokenProvider for StaticTokenSource {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.token.access_token.clone())
    }

    async fn authorization_header(&self) -> Result<String, AuthError> {
        Ok(format!("{} {}", self.token.token_type, self.token.access_token))
    }
}

// =============================================================================
// AuthStatus
// =============================================================================

/// Snapshot of the cached credentials for the configured method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub method: GrantMethod,
    /// `None` when the method's client or environment ID is not configured.
    pub slot_key: Option<String>,
    pub stored: bool,
    pub valid: bool,
    pub expiry: Option<DateTime<Utc>>,
    pub expires_in_secs: Option<i64>,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Authentication method: {}", self.method)?;
        match (&self.slot_key, self.stored) {
            (None, _) => write!(f, "Status: not configured"),
            (Some(_), false) => write!(f, "Status: not logged in"),
            (Some(_), true) if self.valid => {
                let secs = self.expires_in_secs.unwrap_or_default();
                write!(f, "Status: logged in (token expires in {}m {}s)", secs / 60, secs % 60)
            }
            (Some(_), true) => write!(f, "Status: token expired"),
        }
    }
}

// =============================================================================
// AuthSession
// =============================================================================

/// Authentication context owned by one CLI invocation.
pub struct AuthSession {
    settings: Arc<dyn ConfigSource>,
    store: StorageSelector,
    exchange: Arc<dyn TokenExchange>,
    notifier: Notifier,
    clock: Clock,
}

impl AuthSession {
    pub fn new(
        settings: Arc<dyn ConfigSource>,
        store: StorageSelector,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        Self {
            settings,
            store,
            exchange,
            notifier: stderr_notifier(),
            clock: system_clock(),
        }
    }

    /// Session over the default storage backends and the PingOne HTTP exchange.
    pub fn from_config(settings: Arc<dyn ConfigSource>) -> Result<Self, AuthError> {
        let store = StorageSelector::with_default_backends(settings.clone())?;
        let exchange = Arc::new(HttpTokenExchange::new(store.clone()));
        Ok(Self::new(settings, store, exchange))
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &dyn ConfigSource {
        self.settings.as_ref()
    }

    pub fn store(&self) -> &StorageSelector {
        &self.store
    }

    /// The grant method selected in configuration, with `worker` normalized.
    pub fn configured_method(&self) -> Result<GrantMethod, AuthError> {
        GrantMethod::configured(self.settings())
    }

    fn stored_token(&self, method: GrantMethod) -> Option<TokenInfo> {
        let slot = method.configured_slot_key(self.settings()).ok()?;
        match self.store.load(&slot) {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "Treating unreadable token cache as a miss");
                None
            }
        }
    }

    /// Return a token source that is valid right now.
    ///
    /// A cached token for the configured method is reused while its expiry is
    /// strictly in the future. Otherwise the configured method's login runs.
    pub async fn get_valid_token_source(&self) -> Result<StaticTokenSource, AuthError> {
        let configured = self.configured_method();

        if let Ok(method) = &configured {
            match self.stored_token(*method) {
                Some(token) if token.is_valid_at((self.clock)()) => {
                    debug!(%method, "Using cached token");
                    return Ok(StaticTokenSource::new(token));
                }
                Some(_) => debug!(%method, "Cached token expired"),
                None => debug!(%method, "No cached token"),
            }
        }

        let method = configured?;
        let outcome = self.login(method).await?;
        Ok(StaticTokenSource::new(outcome.token))
    }

    /// Run the login orchestrator for `method`.
    pub async fn login(&self, method: GrantMethod) -> Result<LoginOutcome, AuthError> {
        let strategy = GrantStrategy::for_method(method);
        let outcome = login(
            &strategy,
            self.settings(),
            &self.store,
            self.exchange.as_ref(),
        )
        .await?;

        if outcome.new_authentication {
            info!(%method, "Authenticated");
            (self.notifier)(&format!("Successfully logged in using {method}."));
        }
        Ok(outcome)
    }

    /// Clear cached tokens.
    ///
    /// With `None`, every method whose identity fields are configured is
    /// cleared. Returns the methods whose slots were cleared.
    pub fn logout(&self, method: Option<GrantMethod>) -> Result<Vec<GrantMethod>, AuthError> {
        let explicit = method.is_some();
        let methods = match method {
            Some(method) => vec![method],
            None => GrantMethod::ALL.to_vec(),
        };

        let mut cleared = Vec::new();
        let mut errors = Vec::new();
        for method in methods {
            let slot = match method.configured_slot_key(self.settings()) {
                Ok(slot) => slot,
                Err(e) if explicit => return Err(e),
                Err(_) => continue,
            };
            match self.store.clear(&slot) {
                Ok(()) => cleared.push(method),
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok(cleared),
            1 => Err(errors.remove(0)),
            _ => Err(AuthError::Backends(errors)),
        }
    }

    /// Report what is cached for the configured method.
    pub fn status(&self) -> Result<AuthStatus, AuthError> {
        let method = self.configured_method()?;
        let slot_key = method.configured_slot_key(self.settings()).ok();
        let token = self.stored_token(method);
        let now = (self.clock)();

        Ok(AuthStatus {
            method,
            stored: token.is_some(),
            valid: token.as_ref().is_some_and(|t| t.is_valid_at(now)),
            expiry: token.as_ref().and_then(|t| t.expiry),
            expires_in_secs: token
                .as_ref()
                .filter(|t| t.expiry.is_some())
                .map(|t| i64::try_from(t.time_until_expiry(now).as_secs()).unwrap_or(i64::MAX)),
            slot_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;
    use crate::oauth::grant::GrantConfig;
    use crate::oauth::storage::{MemoryTokenStorage, TokenStorage};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Exchange that persists like the real one but never touches the network.
    struct CountingExchange {
        store: StorageSelector,
        access_token: &'static str,
        expires_in: i64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn token(&self, config: &GrantConfig) -> Result<TokenInfo, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let token = TokenInfo::new(self.access_token.into(), None, Some(self.expires_in));
            self.store.save(&config.slot_key()?, &token)?;
            Ok(token)
        }
    }

    fn settings(auth_type: &str) -> Arc<dyn ConfigSource> {
        let values: HashMap<String, String> = [
            (keys::AUTH_TYPE, auth_type),
            (keys::CLIENT_CREDENTIALS_CLIENT_ID, "client-1"),
            (keys::CLIENT_CREDENTIALS_CLIENT_SECRET, "secret"),
            (keys::CLIENT_CREDENTIALS_ENVIRONMENT_ID, "env-1"),
            (keys::DEVICE_CODE_CLIENT_ID, "device-client"),
            (keys::DEVICE_CODE_ENVIRONMENT_ID, "env-1"),
            (keys::REGION_CODE, "NA"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Arc::new(values)
    }

    struct Fixture {
        session: AuthSession,
        memory: MemoryTokenStorage,
        exchange: Arc<CountingExchange>,
        messages: Arc<Mutex<Vec<String>>>,
    }

    fn fixture(auth_type: &str) -> Fixture {
        let settings = settings(auth_type);
        let memory = MemoryTokenStorage::new();
        let store = StorageSelector::new(None, Arc::new(memory.clone()), settings.clone());
        let exchange = Arc::new(CountingExchange {
            store: store.clone(),
            access_token: "fresh",
            expires_in: 3600,
            calls: AtomicUsize::new(0),
        });
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        let session = AuthSession::new(settings, store, exchange.clone())
            .with_notifier(Arc::new(move |m: &str| sink.lock().unwrap().push(m.to_string())));
        Fixture {
            session,
            memory,
            exchange,
            messages,
        }
    }

    fn calls(f: &Fixture) -> usize {
        f.exchange.calls.load(Ordering::SeqCst)
    }

    fn seed(f: &Fixture, method: GrantMethod, token: &TokenInfo) -> String {
        let slot = method.configured_slot_key(f.session.settings()).unwrap();
        f.memory.save(&slot, token).unwrap();
        slot
    }

    #[tokio::test]
    async fn test_resolver_logs_in_then_reuses_cache() {
        let f = fixture("client_credentials");

        let first = f.session.get_valid_token_source().await.unwrap();
        assert_eq!(first.token().access_token, "fresh");
        assert_eq!(calls(&f), 1);
        assert_eq!(f.memory.len(), 1);
        assert_eq!(f.messages.lock().unwrap().len(), 1);

        let second = f.session.get_valid_token_source().await.unwrap();
        assert_eq!(second, first);
        assert_eq!(calls(&f), 1);
    }

    #[tokio::test]
    async fn test_expiry_equal_to_now_triggers_login() {
        let now = Utc::now();
        let f = fixture("client_credentials");
        seed(
            &f,
            GrantMethod::ClientCredentials,
            &TokenInfo::with_expiry("cached".into(), None, Some(now)),
        );
        let session = f.session.with_clock(Arc::new(move || now));

        let source = session.get_valid_token_source().await.unwrap();
        assert_eq!(source.token().access_token, "fresh");
        assert_eq!(f.exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiry_one_second_ahead_is_valid() {
        let now = Utc::now();
        let f = fixture("client_credentials");
        seed(
            &f,
            GrantMethod::ClientCredentials,
            &TokenInfo::with_expiry("cached".into(), None, Some(now + chrono::Duration::seconds(1))),
        );
        let session = f.session.with_clock(Arc::new(move || now));

        let source = session.get_valid_token_source().await.unwrap();
        assert_eq!(source.token().access_token, "cached");
        assert_eq!(f.exchange.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_alias_uses_client_credentials_slot() {
        let f = fixture("worker");
        seed(
            &f,
            GrantMethod::ClientCredentials,
            &TokenInfo::new("cached".into(), None, Some(600)),
        );
        let source = f.session.get_valid_token_source().await.unwrap();
        assert_eq!(source.token().access_token, "cached");
        assert_eq!(calls(&f), 0);
    }

    #[tokio::test]
    async fn test_only_configured_method_is_consulted() {
        let f = fixture("client_credentials");
        seed(
            &f,
            GrantMethod::DeviceCode,
            &TokenInfo::new("device".into(), None, Some(600)),
        );
        let source = f.session.get_valid_token_source().await.unwrap();
        assert_eq!(source.token().access_token, "fresh");
        assert_eq!(calls(&f), 1);
    }

    #[tokio::test]
    async fn test_unsupported_auth_type() {
        let f = fixture("password");
        let err = f.session.get_valid_token_source().await.unwrap_err();
        assert!(matches!(&err, AuthError::UnsupportedAuthType(v) if v == "password"));
        assert!(err.to_string().contains("pingcli login"));
        assert_eq!(calls(&f), 0);
    }

    #[tokio::test]
    async fn test_reused_token_is_not_announced() {
        let f = fixture("client_credentials");
        seed(
            &f,
            GrantMethod::ClientCredentials,
            &TokenInfo::new("fresh".into(), None, Some(600)),
        );
        let outcome = f.session.login(GrantMethod::ClientCredentials).await.unwrap();
        assert!(!outcome.new_authentication);
        assert!(f.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn test_logout_clears_configured_methods() {
        let f = fixture("client_credentials");
        let token = TokenInfo::new("abc".into(), None, Some(600));
        seed(&f, GrantMethod::ClientCredentials, &token);
        seed(&f, GrantMethod::DeviceCode, &token);

        let cleared = f.session.logout(None).unwrap();
        assert_eq!(
            cleared,
            vec![GrantMethod::DeviceCode, GrantMethod::ClientCredentials]
        );
        assert!(f.memory.is_empty());

        // Idempotent.
        assert_eq!(f.session.logout(None).unwrap().len(), 2);
    }

    #[test]
    fn test_logout_single_method() {
        let f = fixture("client_credentials");
        let token = TokenInfo::new("abc".into(), None, Some(600));
        seed(&f, GrantMethod::ClientCredentials, &token);
        let device_slot = seed(&f, GrantMethod::DeviceCode, &token);

        f.session.logout(Some(GrantMethod::ClientCredentials)).unwrap();
        assert_eq!(f.memory.len(), 1);
        assert!(f.memory.exists(&device_slot).unwrap());
    }

    #[test]
    fn test_logout_unconfigured_explicit_method_fails() {
        let f = fixture("client_credentials");
        let err = f
            .session
            .logout(Some(GrantMethod::AuthorizationCode))
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::ClientIdNotConfigured {
                key: keys::AUTH_CODE_CLIENT_ID
            }
        ));
        assert!(err.to_string().contains("pingcli config set"));
    }

    #[test]
    fn test_status() {
        let now = Utc::now();
        let f = fixture("client_credentials");
        let session = f.session.with_clock(Arc::new(move || now));

        let status = session.status().unwrap();
        assert_eq!(status.method, GrantMethod::ClientCredentials);
        assert!(status.slot_key.is_some());
        assert!(!status.stored && !status.valid);
        assert!(status.to_string().contains("not logged in"));

        let slot = status.slot_key.clone().unwrap();
        f.memory
            .save(
                &slot,
                &TokenInfo::with_expiry("abc".into(), None, Some(now + chrono::Duration::seconds(125))),
            )
            .unwrap();
        let status = session.status().unwrap();
        assert!(status.stored && status.valid);
        assert_eq!(status.expires_in_secs, Some(125));
        assert!(status.to_string().contains("expires in 2m 5s"));

        f.memory
            .save(
                &slot,
                &TokenInfo::with_expiry("abc".into(), None, Some(now - chrono::Duration::seconds(10))),
            )
            .unwrap();
        let status = session.status().unwrap();
        assert!(status.stored && !status.valid);
        assert_eq!(status.expires_in_secs, Some(0));
        assert!(status.to_string().contains("token expired"));
    }

    #[tokio::test]
    async fn test_static_token_source() {
        let source = StaticTokenSource::new(TokenInfo::new("abc".into(), None, Some(60)));
        assert_eq!(source.authorization_header().await.unwrap(), "Bearer abc");
        assert_eq!(source.access_token().await.unwrap(), "abc");

        let custom = StaticTokenSource::new(
            TokenInfo::new("abc".into(), None, Some(60)).with_token_type("DPoP"),
        );
        assert_eq!(custom.authorization_header().await.unwrap(), "DPoP abc");
    }
}
