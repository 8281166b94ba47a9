//! Cached token state.
//!
//! [`TokenInfo`] is the unit persisted by every storage backend. Its JSON
//! shape is flat, with explicit field names:
//!
//! ```text
//! {"access_token": "...", "token_type": "Bearer", "refresh_token": "...", "expiry": "2026-10-19T12:00:00Z"}
//! ```
//!
//! `refresh_token` and `expiry` are omitted when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OAuth token obtained by one of the grant flows.
///
/// Read-only once created: a newer login replaces the whole value in the
/// storage slot rather than mutating it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    /// The OAuth access token for API requests.
    pub access_token: String,

    /// Token type, typically "Bearer".
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token, if the grant issued one. Stored but never exchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiry, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// `now + secs`, or `None` if the result is out of range.
pub fn expiry_after(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_seconds(secs).and_then(|lifetime| now.checked_add_signed(lifetime))
}

impl TokenInfo {
    /// Create a new TokenInfo from a token endpoint response.
    ///
    /// `expires_in` is relative to now. `None`, or a lifetime too large to
    /// represent, leaves the expiry unknown.
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: Option<i64>) -> Self {
        let expiry = expires_in.and_then(|secs| expiry_after(Utc::now(), secs));
        Self::with_expiry(access_token, refresh_token, expiry)
    }

    /// Create a TokenInfo with a specific absolute expiry.
    pub fn with_expiry(
        access_token: String,
        refresh_token: Option<String>,
        expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token,
            token_type: default_token_type(),
            refresh_token: refresh_token.filter(|rt| !rt.is_empty()),
            expiry,
        }
    }

    /// Set the token type reported by the token endpoint.
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Whether an access token is present at all.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Whether the token can be used at `now`.
    ///
    /// Strict comparison: a token expiring exactly at `now` is already
    /// invalid. A token with no expiry is never considered valid.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_present() && self.expiry.is_some_and(|exp| now < exp)
    }

    /// Whether the token can be used right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Get the duration until the access token expires.
    ///
    /// Returns `Duration::ZERO` if the token has already expired or has no expiry set.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expiry
            .and_then(|exp| (exp - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}
