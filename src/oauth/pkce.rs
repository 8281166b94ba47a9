//! PKCE (RFC 7636) and anti-forgery state for the authorization code flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

const CHALLENGE_METHOD: &str = "S256";

/// RFC 7636 unreserved characters.
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const VERIFIER_LEN: usize = 64;

/// A code verifier, its S256 challenge and the `state` sent alongside.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl Pkce {
    /// Generate a fresh verifier and state.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let verifier: String = (0..VERIFIER_LEN)
            .map(|_| VERIFIER_ALPHABET[rng.random_range(0..VERIFIER_ALPHABET.len())] as char)
            .collect();

        Self {
            challenge: challenge_for(&verifier),
            verifier,
            state: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Query parameters the authorization request carries for PKCE.
    pub fn authorization_params(&self) -> [(&'static str, &str); 3] {
        [
            ("code_challenge", self.challenge.as_str()),
            ("code_challenge_method", CHALLENGE_METHOD),
            ("state", self.state.as_str()),
        ]
    }

    /// Whether the `state` returned by the provider matches ours.
    pub fn state_matches(&self, returned: &str) -> bool {
        !returned.is_empty() && returned == self.state
    }
}

/// S256 challenge: base64url(sha256(verifier)) without padding.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
