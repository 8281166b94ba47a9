//! Storage slot key derivation.
//!
//! A slot key identifies the cached token for one
//! (environment, client, grant method) triple:
//!
//! ```text
//! token-<hex(sha256("{environment_id}:{client_id}:{method}")[..8])>
//! ```
//!
//! The key is safe as a filename and as a keyring account name, and does not
//! expose the client or environment ID in plaintext. Colon is used as the
//! separator without escaping; neither IDs nor method names contain one.

use sha2::{Digest, Sha256};

use super::AuthError;
use super::grant::GrantMethod;

/// Prefix shared by every slot key.
pub const SLOT_KEY_PREFIX: &str = "token-";

/// Number of digest bytes kept in the key.
const DIGEST_PREFIX_LEN: usize = 8;

/// Derive the storage slot key for a token.
///
/// Pure: identical inputs always give the identical key. Fails with
/// [`AuthError::MissingIdentityFields`] when either ID is empty.
pub fn derive_slot_key(
    environment_id: &str,
    client_id: &str,
    method: GrantMethod,
) -> Result<String, AuthError> {
    if environment_id.is_empty() || client_id.is_empty() {
        return Err(AuthError::MissingIdentityFields);
    }

    let mut hasher = Sha256::new();
    hasher.update(format!("{environment_id}:{client_id}:{method}").as_bytes());
    let digest = hasher.finalize();

    Ok(format!(
        "{SLOT_KEY_PREFIX}{}",
        hex::encode(&digest[..DIGEST_PREFIX_LEN])
    ))
}
