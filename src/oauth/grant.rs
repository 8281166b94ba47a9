//! Grant methods and per-flow configuration builders.
//!
//! Each builder reads its fields from a [`ConfigSource`] in a fixed order
//! (client ID, environment ID, then the flow-specific field) and stops at the
//! first empty one, so the reported error is deterministic.
//!
//! # Region mapping
//!
//! | code | top-level domain |
//! |------|------------------|
//! | AP   | `asia`           |
//! | AU   | `com.au`         |
//! | CA   | `ca`             |
//! | EU   | `eu`             |
//! | NA   | `com`            |
//! | SG   | `sg`             |

use std::fmt;
use std::str::FromStr;

use super::AuthError;
use super::key::derive_slot_key;
use crate::config::{ConfigSource, keys};

// =============================================================================
// GrantMethod
// =============================================================================

/// The OAuth2 flow used to obtain a token.
///
/// The legacy `worker` name parses to [`GrantMethod::ClientCredentials`];
/// once parsed, the alias no longer exists anywhere downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantMethod {
    DeviceCode,
    AuthorizationCode,
    ClientCredentials,
}

impl GrantMethod {
    /// Every supported method.
    pub const ALL: [GrantMethod; 3] = [
        GrantMethod::DeviceCode,
        GrantMethod::AuthorizationCode,
        GrantMethod::ClientCredentials,
    ];

    /// Configuration name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceCode => "device_code",
            Self::AuthorizationCode => "auth_code",
            Self::ClientCredentials => "client_credentials",
        }
    }

    /// OAuth2 `grant_type` sent to the token endpoint.
    pub fn grant_type(self) -> &'static str {
        match self {
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
        }
    }

    pub fn client_id_key(self) -> &'static str {
        match self {
            Self::DeviceCode => keys::DEVICE_CODE_CLIENT_ID,
            Self::AuthorizationCode => keys::AUTH_CODE_CLIENT_ID,
            Self::ClientCredentials => keys::CLIENT_CREDENTIALS_CLIENT_ID,
        }
    }

    pub fn environment_id_key(self) -> &'static str {
        match self {
            Self::DeviceCode => keys::DEVICE_CODE_ENVIRONMENT_ID,
            Self::AuthorizationCode => keys::AUTH_CODE_ENVIRONMENT_ID,
            Self::ClientCredentials => keys::CLIENT_CREDENTIALS_ENVIRONMENT_ID,
        }
    }

    pub fn scopes_key(self) -> &'static str {
        match self {
            Self::DeviceCode => keys::DEVICE_CODE_SCOPES,
            Self::AuthorizationCode => keys::AUTH_CODE_SCOPES,
            Self::ClientCredentials => keys::CLIENT_CREDENTIALS_SCOPES,
        }
    }

    /// Read and normalize the configured authentication method.
    pub fn configured(source: &dyn ConfigSource) -> Result<Self, AuthError> {
        source.lookup(keys::AUTH_TYPE).unwrap_or_default().parse()
    }

    /// Slot key for this method's configured environment and client IDs.
    ///
    /// Reads only the identity fields, not the full grant configuration. A
    /// missing field is reported with the key to set, as the builders do.
    pub fn configured_slot_key(self, source: &dyn ConfigSource) -> Result<String, AuthError> {
        let client_id = required(source, self.client_id_key(), client_id_missing)?;
        let environment_id = required(source, self.environment_id_key(), environment_id_missing)?;
        derive_slot_key(&environment_id, &client_id, self)
    }
}

impl fmt::Display for GrantMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "device_code" => Ok(Self::DeviceCode),
            "auth_code" => Ok(Self::AuthorizationCode),
            "client_credentials" | "worker" => Ok(Self::ClientCredentials),
            _ => Err(AuthError::UnsupportedAuthType(s.to_string())),
        }
    }
}

// =============================================================================
// Region
// =============================================================================

/// PingOne region, identified by its configured code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    AsiaPacific,
    Australia,
    Canada,
    Europe,
    NorthAmerica,
    Singapore,
}

impl Region {
    /// Map a region code to a region. Unknown or empty codes are rejected;
    /// there is no default region.
    pub fn from_code(code: &str) -> Result<Self, AuthError> {
        match code.trim().to_uppercase().as_str() {
            "AP" => Ok(Self::AsiaPacific),
            "AU" => Ok(Self::Australia),
            "CA" => Ok(Self::Canada),
            "EU" => Ok(Self::Europe),
            "NA" => Ok(Self::NorthAmerica),
            "SG" => Ok(Self::Singapore),
            _ => Err(AuthError::RegionCodeRequired {
                value: code.to_string(),
            }),
        }
    }

    /// Read the configured region code.
    pub fn configured(source: &dyn ConfigSource) -> Result<Self, AuthError> {
        Self::from_code(&source.lookup(keys::REGION_CODE).unwrap_or_default())
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::AsiaPacific => "AP",
            Self::Australia => "AU",
            Self::Canada => "CA",
            Self::Europe => "EU",
            Self::NorthAmerica => "NA",
            Self::Singapore => "SG",
        }
    }

    pub fn top_level_domain(self) -> &'static str {
        match self {
            Self::AsiaPacific => "asia",
            Self::Australia => "com.au",
            Self::Canada => "ca",
            Self::Europe => "eu",
            Self::NorthAmerica => "com",
            Self::Singapore => "sg",
        }
    }

    /// Authorization server host, e.g. `https://auth.pingone.eu`.
    pub fn auth_host(self) -> String {
        format!("https://auth.pingone.{}", self.top_level_domain())
    }

    /// Management API base, e.g. `https://api.pingone.eu/v1`.
    pub fn api_base(self) -> String {
        format!("https://api.pingone.{}/v1", self.top_level_domain())
    }
}

// =============================================================================
// GrantConfig
// =============================================================================

/// Parameters for one login attempt. Built fresh per attempt, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct GrantConfig {
    pub method: GrantMethod,
    /// OAuth2 grant type, always set explicitly from `method`.
    pub grant_type: &'static str,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub environment_id: String,
    pub redirect_uri: Option<String>,
    /// Requested scopes; `None` means the scope parameter is omitted.
    pub scopes: Option<Vec<String>>,
    pub region: Region,
    /// Authorization server host; derived from `region` unless overridden.
    pub auth_host: String,
}

impl fmt::Debug for GrantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantConfig")
            .field("method", &self.method)
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("environment_id", &self.environment_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("region", &self.region)
            .field("auth_host", &self.auth_host)
            .finish()
    }
}

impl GrantConfig {
    /// Point the flow at a different authorization host (tests, proxies).
    pub fn with_auth_host(mut self, host: impl Into<String>) -> Self {
        self.auth_host = host.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/as/{}",
            self.auth_host.trim_end_matches('/'),
            self.environment_id,
            path
        )
    }

    pub fn token_url(&self) -> String {
        self.endpoint("token")
    }

    pub fn authorize_url(&self) -> String {
        self.endpoint("authorize")
    }

    pub fn device_authorization_url(&self) -> String {
        self.endpoint("device_authorization")
    }

    /// Space-separated `scope` parameter, if any scopes were requested.
    pub fn scope_param(&self) -> Option<String> {
        self.scopes.as_ref().map(|s| s.join(" "))
    }

    /// Storage slot key for tokens obtained with this configuration.
    pub fn slot_key(&self) -> Result<String, AuthError> {
        derive_slot_key(&self.environment_id, &self.client_id, self.method)
    }
}

/// Read a required field, failing with `missing(key)` when empty.
fn required(
    source: &dyn ConfigSource,
    key: &'static str,
    missing: fn(&'static str) -> AuthError,
) -> Result<String, AuthError> {
    match source.lookup(key) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(missing(key)),
    }
}

/// Split a comma-separated scope list, trimming entries and dropping empty ones.
///
/// Returns `None` when nothing is left so the scope parameter can be omitted.
pub fn parse_scopes(raw: Option<&str>) -> Option<Vec<String>> {
    let scopes: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!scopes.is_empty()).then_some(scopes)
}

fn client_id_missing(key: &'static str) -> AuthError {
    AuthError::ClientIdNotConfigured { key }
}

fn environment_id_missing(key: &'static str) -> AuthError {
    AuthError::EnvironmentIdNotConfigured { key }
}

fn base_config(
    source: &dyn ConfigSource,
    method: GrantMethod,
    client_id: String,
    environment_id: String,
) -> Result<GrantConfig, AuthError> {
    let region = Region::configured(source)?;
    Ok(GrantConfig {
        method,
        grant_type: method.grant_type(),
        client_id,
        client_secret: None,
        environment_id,
        redirect_uri: None,
        scopes: parse_scopes(source.lookup(method.scopes_key()).as_deref()),
        region,
        auth_host: region.auth_host(),
    })
}

/// Build the device authorization grant configuration.
pub fn device_code_config(source: &dyn ConfigSource) -> Result<GrantConfig, AuthError> {
    let method = GrantMethod::DeviceCode;
    let client_id = required(source, method.client_id_key(), client_id_missing)?;
    let environment_id = required(source, method.environment_id_key(), environment_id_missing)?;
    base_config(source, method, client_id, environment_id)
}

/// Build the authorization code grant configuration.
pub fn auth_code_config(source: &dyn ConfigSource) -> Result<GrantConfig, AuthError> {
    let method = GrantMethod::AuthorizationCode;
    let client_id = required(source, method.client_id_key(), client_id_missing)?;
    let environment_id = required(source, method.environment_id_key(), environment_id_missing)?;
    let redirect_uri = required(source, keys::AUTH_CODE_REDIRECT_URI, |key| {
        AuthError::RedirectUriNotConfigured { key }
    })?;
    Ok(GrantConfig {
        redirect_uri: Some(redirect_uri),
        ..base_config(source, method, client_id, environment_id)?
    })
}

/// Build the client credentials grant configuration.
pub fn client_credentials_config(source: &dyn ConfigSource) -> Result<GrantConfig, AuthError> {
    let method = GrantMethod::ClientCredentials;
    let client_id = required(source, method.client_id_key(), client_id_missing)?;
    let environment_id = required(source, method.environment_id_key(), environment_id_missing)?;
    let client_secret = required(source, keys::CLIENT_CREDENTIALS_CLIENT_SECRET, |key| {
        AuthError::ClientSecretNotConfigured { key }
    })?;
    Ok(GrantConfig {
        client_secret: Some(client_secret),
        ..base_config(source, method, client_id, environment_id)?
    })
}

// =============================================================================
// GrantStrategy
// =============================================================================

/// Builder function for one grant method.
pub type ConfigBuilder = fn(&dyn ConfigSource) -> Result<GrantConfig, AuthError>;

/// A grant method paired with its configuration builder.
///
/// The login orchestrator is generic over this value, so every method runs
/// the same steps.
#[derive(Debug, Clone, Copy)]
pub struct GrantStrategy {
    pub method: GrantMethod,
    pub build: ConfigBuilder,
}

impl GrantStrategy {
    pub fn for_method(method: GrantMethod) -> Self {
        let build: ConfigBuilder = match method {
            GrantMethod::DeviceCode => device_code_config,
            GrantMethod::AuthorizationCode => auth_code_config,
            GrantMethod::ClientCredentials => client_credentials_config,
        };
        Self { method, build }
    }

    pub fn build_config(&self, source: &dyn ConfigSource) -> Result<GrantConfig, AuthError> {
        (self.build)(source)
    }
}
