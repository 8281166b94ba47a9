//! Credential lifecycle for the pingcli OAuth grant flows.
//!
//! Obtains tokens through the configured grant (device code, authorization
//! code, client credentials), caches them between CLI invocations and
//! decides when a cached token can be reused.
//!
//! # Architecture
//!
//! - [`derive_slot_key`] - Maps (environment, client, method) to an opaque storage slot
//! - [`TokenStorage`] - Pluggable token persistence (file, keyring, memory)
//! - [`StorageSelector`] - Keyring-first storage with per-operation file fallback
//! - [`GrantConfig`] / [`GrantStrategy`] - Per-method configuration builders
//! - [`TokenExchange`] - The OAuth2 exchange seam ([`HttpTokenExchange`] talks to PingOne)
//! - [`login`] - The one orchestrator shared by every grant method
//! - [`AuthSession`] - Process-scoped context; resolves a valid token source
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pingcli_auth::config::Config;
//! use pingcli_auth::oauth::{AuthSession, TokenProvider};
//!
//! let config = Arc::new(Config::load(&Config::default_path()?)?);
//! let session = AuthSession::from_config(config)?;
//! let source = session.get_valid_token_source().await?;
//! println!("{}", source.authorization_header().await?);
//! ```

pub mod callback;
pub mod exchange;
pub mod grant;
pub mod key;
pub mod login;
pub mod pkce;
pub mod selector;
pub mod session;
pub mod storage;
pub mod token;

// Re-exports
pub use exchange::{HttpTokenExchange, TokenExchange};
pub use grant::{GrantConfig, GrantMethod, GrantStrategy, Region};
pub use key::derive_slot_key;
pub use login::{LoginOutcome, login};
pub use pkce::Pkce;
pub use selector::StorageSelector;
pub use session::{AuthSession, AuthStatus, StaticTokenSource};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use token::TokenInfo;

#[cfg(feature = "system-keyring")]
pub use storage::KeyringTokenStorage;

use std::path::PathBuf;

// =============================================================================
// TokenProvider Trait
// =============================================================================

/// Trait for providing access tokens.
///
/// This abstracts the source of tokens from the consumers (e.g. the API
/// client), which never re-run authentication themselves.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get the access token to send with API requests.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Value for the HTTP `Authorization` header.
    async fn authorization_header(&self) -> Result<String, AuthError> {
        Ok(format!("Bearer {}", self.access_token().await?))
    }
}

// =============================================================================
// AuthError
// =============================================================================

/// Remediation hint appended to configuration errors.
fn config_hint(key: &str) -> String {
    format!("Run 'pingcli config set {key}=<value>' to configure it")
}

/// Errors that can occur while obtaining, caching or clearing credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Environment ID or client ID was empty when deriving a storage slot.
    #[error("environment ID and client ID are required to derive a storage key")]
    MissingIdentityFields,

    /// The user's home directory could not be resolved.
    #[error("failed to resolve the user home directory for credential storage")]
    HomeDirectoryUnavailable,

    /// No credentials file exists for the slot (a cache miss, not a failure).
    #[error("credentials file does not exist: {}", .0.display())]
    CredentialsFileNotExist(PathBuf),

    #[error("client ID is not configured. {}", config_hint(.key))]
    ClientIdNotConfigured { key: &'static str },

    #[error("environment ID is not configured. {}", config_hint(.key))]
    EnvironmentIdNotConfigured { key: &'static str },

    #[error("client secret is not configured. {}", config_hint(.key))]
    ClientSecretNotConfigured { key: &'static str },

    #[error("redirect URI is not configured. {}", config_hint(.key))]
    RedirectUriNotConfigured { key: &'static str },

    /// Region code missing or outside the supported set.
    #[error(
        "a valid region code is required (got '{value}', expected one of AP, AU, CA, EU, NA, SG). {}",
        config_hint(crate::config::keys::REGION_CODE)
    )]
    RegionCodeRequired { value: String },

    /// The configured authentication method is not one of the supported grants.
    #[error(
        "unsupported authentication type '{0}'. Run 'pingcli login --method <device_code|auth_code|client_credentials>' to authenticate explicitly"
    )]
    UnsupportedAuthType(String),

    /// A token without an access token was handed to storage.
    #[error("cannot save nil token")]
    NilToken,

    /// A stored token exists but could not be parsed.
    #[error("failed to parse credentials file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem error while reading or writing credentials.
    #[error("credentials file I/O failed for '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The system keyring rejected an operation or is unavailable.
    #[error("keyring error: {0}")]
    Keyring(String),

    /// Generic storage error (serialization and the like).
    #[error("storage error: {0}")]
    Storage(String),

    /// Every storage backend consulted for an operation failed.
    #[error("{}", join_errors(.0))]
    Backends(Vec<AuthError>),

    /// Building the grant configuration failed.
    #[error("failed to get {method} configuration: {source}")]
    Configuration {
        method: GrantMethod,
        #[source]
        source: Box<AuthError>,
    },

    /// The OAuth2 exchange failed.
    #[error("failed to get token using {method}: {source}")]
    Exchange {
        method: GrantMethod,
        #[source]
        source: Box<AuthError>,
    },

    /// The token endpoint or flow returned an error.
    #[error("exchange failed: {0}")]
    ExchangeFailed(String),

    /// The authorization callback carried a mismatching state.
    #[error("invalid state token in authorization callback")]
    InvalidState,

    /// The device code or authorization callback window elapsed.
    #[error("authorization flow expired")]
    FlowExpired,

    /// The loopback callback listener failed.
    #[error("authorization callback failed: {0}")]
    Callback(String),

    /// The configured redirect URI cannot be listened on.
    #[error("invalid redirect URI '{0}': expected http://<loopback host>:<port>/<path>")]
    InvalidRedirectUri(String),

    /// A PingOne API call returned a non-success status.
    #[error("API request failed (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn join_errors(errors: &[AuthError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AuthError {
    /// Whether this error only means "nothing cached here".
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CredentialsFileNotExist(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_not_configured_names_the_key() {
        let err = AuthError::ClientIdNotConfigured {
            key: "service.pingOne.authentication.deviceCode.clientID",
        };
        let msg = err.to_string();
        assert!(msg.starts_with("client ID is not configured"));
        assert!(msg.contains(
            "pingcli config set service.pingOne.authentication.deviceCode.clientID=<value>"
        ));
    }

    #[test]
    fn test_unsupported_auth_type_names_value() {
        let err = AuthError::UnsupportedAuthType("saml".into());
        let msg = err.to_string();
        assert!(msg.contains("'saml'"));
        assert!(msg.contains("pingcli login"));
    }

    #[test]
    fn test_nil_token_message() {
        assert_eq!(AuthError::NilToken.to_string(), "cannot save nil token");
    }

    #[test]
    fn test_wrapped_error_keeps_source() {
        let err = AuthError::Configuration {
            method: GrantMethod::DeviceCode,
            source: Box::new(AuthError::RegionCodeRequired { value: "XX".into() }),
        };
        assert!(err
            .to_string()
            .starts_with("failed to get device_code configuration"));
        let source = err.source().unwrap();
        assert!(source.to_string().contains("'XX'"));
    }

    #[test]
    fn test_backends_joins_messages() {
        let err = AuthError::Backends(vec![
            AuthError::Keyring("locked".into()),
            AuthError::Storage("disk full".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "keyring error: locked; storage error: disk full"
        );
    }

    #[test]
    fn test_cache_miss_classification() {
        assert!(AuthError::CredentialsFileNotExist(PathBuf::from("/x")).is_cache_miss());
        assert!(!AuthError::NilToken.is_cache_miss());
    }
}
