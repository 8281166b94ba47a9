//! Shared fixtures for the token lifecycle integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use pingcli_auth::config::{ConfigSource, keys};
use pingcli_auth::oauth::{
    AuthError, FileTokenStorage, GrantConfig, HttpTokenExchange, StorageSelector, TokenExchange,
    TokenInfo, TokenStorage,
};

/// Settings for a client-credentials worker in `env-1`.
pub fn worker_settings(auth_type: &str) -> HashMap<String, String> {
    [
        (keys::AUTH_TYPE, auth_type),
        (keys::CLIENT_CREDENTIALS_CLIENT_ID, "client-1"),
        (keys::CLIENT_CREDENTIALS_CLIENT_SECRET, "worker-secret"),
        (keys::CLIENT_CREDENTIALS_ENVIRONMENT_ID, "env-1"),
        (keys::REGION_CODE, "NA"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// A secure store that rejects every operation, like a headless Linux box
/// without a secret service.
pub struct UnavailableKeyring;

impl TokenStorage for UnavailableKeyring {
    fn load(&self, _slot: &str) -> Result<Option<TokenInfo>, AuthError> {
        Err(AuthError::Keyring("platform secure storage failure".into()))
    }

    fn save(&self, _slot: &str, _token: &TokenInfo) -> Result<(), AuthError> {
        Err(AuthError::Keyring("platform secure storage failure".into()))
    }

    fn remove(&self, _slot: &str) -> Result<(), AuthError> {
        Err(AuthError::Keyring("platform secure storage failure".into()))
    }

    fn name(&self) -> &str {
        "unavailable-keyring"
    }
}

/// Selector whose keyring always fails and whose file backend lives in `dir`.
pub fn file_fallback_selector(dir: &Path, settings: Arc<dyn ConfigSource>) -> StorageSelector {
    StorageSelector::new(
        Some(Arc::new(UnavailableKeyring)),
        Arc::new(FileTokenStorage::new(dir)),
        settings,
    )
}

/// Sends every flow to a mock authorization server instead of the regional host.
pub struct MockHostExchange {
    pub inner: HttpTokenExchange,
    pub host: String,
}

#[async_trait]
impl TokenExchange for MockHostExchange {
    async fn token(&self, config: &GrantConfig) -> Result<TokenInfo, AuthError> {
        let config = config.clone().with_auth_host(self.host.as_str());
        self.inner.token(&config).await
    }
}
