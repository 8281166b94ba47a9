//! The login orchestrator shared by every grant method.
//!
//! Steps, in order: build the grant configuration, look up any previously
//! cached token (for comparison only), run the exchange, then report whether
//! the returned token is new.

use tracing::debug;

use super::AuthError;
use super::exchange::TokenExchange;
use super::grant::GrantStrategy;
use super::selector::StorageSelector;
use super::token::TokenInfo;
use crate::config::ConfigSource;

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub token: TokenInfo,
    /// True when the token differs from whatever was cached before.
    /// Only used to decide whether to print a confirmation.
    pub new_authentication: bool,
}

/// Run the login state machine for `strategy`.
///
/// Persistence is the exchange's job; this function never writes to `store`.
pub async fn login(
    strategy: &GrantStrategy,
    settings: &dyn ConfigSource,
    store: &StorageSelector,
    exchange: &dyn TokenExchange,
) -> Result<LoginOutcome, AuthError> {
    let method = strategy.method;
    let config = strategy
        .build_config(settings)
        .map_err(|e| AuthError::Configuration {
            method,
            source: Box::new(e),
        })?;

    let previous = config
        .slot_key()
        .ok()
        .and_then(|slot| match store.load(&slot) {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "No prior token to compare against");
                None
            }
        });

    let token = exchange
        .token(&config)
        .await
        .map_err(|e| AuthError::Exchange {
            method,
            source: Box::new(e),
        })?;

    let new_authentication = previous
        .as_ref()
        .is_none_or(|prev| prev.access_token != token.access_token);
    debug!(%method, new_authentication, "Login complete");

    Ok(LoginOutcome {
        token,
        new_authentication,
    })
}
