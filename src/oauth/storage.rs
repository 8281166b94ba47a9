//! Token storage backends for persisting OAuth credentials.
//!
//! Provides the [`TokenStorage`] trait and several implementations:
//! - [`FileTokenStorage`] - Stores tokens as individual JSON files per slot
//! - [`KeyringTokenStorage`] - System keyring storage (requires `system-keyring` feature)
//! - [`MemoryTokenStorage`] - In-memory storage for testing and embedding
//!
//! All storage operations are synchronous and keyed by a storage slot key
//! (see [`derive_slot_key`](super::derive_slot_key)). A missing entry is
//! `Ok(None)`, never an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

use super::AuthError;
use super::token::TokenInfo;

// =============================================================================
// TokenStorage trait
// =============================================================================

/// Trait for token storage backends.
///
/// All storage implementations must be thread-safe (`Send + Sync`).
pub trait TokenStorage: Send + Sync {
    /// Load the stored token for a slot, if any.
    fn load(&self, slot: &str) -> Result<Option<TokenInfo>, AuthError>;

    /// Save a token for a slot, replacing any previous one.
    fn save(&self, slot: &str, token: &TokenInfo) -> Result<(), AuthError>;

    /// Remove the stored token for a slot. Removing nothing is not an error.
    fn remove(&self, slot: &str) -> Result<(), AuthError>;

    /// Check if a token exists in storage for a slot.
    fn exists(&self, slot: &str) -> Result<bool, AuthError> {
        Ok(self.load(slot)?.is_some())
    }

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: TokenStorage + ?Sized> TokenStorage for Arc<T> {
    fn load(&self, slot: &str) -> Result<Option<TokenInfo>, AuthError> {
        (**self).load(slot)
    }
    fn save(&self, slot: &str, token: &TokenInfo) -> Result<(), AuthError> {
        (**self).save(slot, token)
    }
    fn remove(&self, slot: &str) -> Result<(), AuthError> {
        (**self).remove(slot)
    }
    fn exists(&self, slot: &str) -> Result<bool, AuthError> {
        (**self).exists(slot)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// FileTokenStorage
// =============================================================================

/// File permissions for token files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Directory under the user's home holding pingcli state.
const BASE_DIR: &str = ".pingcli";

/// Subdirectory of [`BASE_DIR`] holding one file per storage slot.
const CREDENTIALS_DIR: &str = "credentials";

/// Extension of credentials files.
const CREDENTIALS_EXT: &str = "json";

/// Default credentials directory: `<home>/.pingcli/credentials`.
pub fn credentials_dir() -> Result<PathBuf, AuthError> {
    let home = dirs::home_dir().ok_or(AuthError::HomeDirectoryUnavailable)?;
    Ok(home.join(BASE_DIR).join(CREDENTIALS_DIR))
}

/// Resolve (and create, if absent) the credentials file path for a slot
/// under the user's home directory.
pub fn credentials_path(slot: &str) -> Result<PathBuf, AuthError> {
    FileTokenStorage::in_home()?.credentials_path(slot)
}

/// Write a token to `path` as JSON with owner-only permissions.
///
/// The write goes to a sibling temp file first and is renamed into place,
/// so a crash never leaves a half-written credentials file behind.
pub fn save_to_file(path: &Path, token: &TokenInfo) -> Result<(), AuthError> {
    if !token.is_present() {
        return Err(AuthError::NilToken);
    }

    let content = serde_json::to_string_pretty(token)
        .map_err(|e| AuthError::Storage(format!("Failed to serialize token: {}", e)))?;

    let temp_path = path.with_extension("tmp");
    let io_err = |source| AuthError::Io {
        path: temp_path.clone(),
        source,
    };

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&temp_path)
            .map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&temp_path, &content).map_err(io_err)?;
    }

    if let Err(source) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(AuthError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

/// Read a token from `path`.
///
/// A missing file is [`AuthError::CredentialsFileNotExist`]; unparseable
/// content (including a truncated write) is [`AuthError::Parse`].
pub fn load_from_file(path: &Path) -> Result<TokenInfo, AuthError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AuthError::CredentialsFileNotExist(path.to_path_buf()));
        }
        Err(source) => {
            return Err(AuthError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&content).map_err(|source| AuthError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Delete the credentials file at `path`. A missing file is fine.
pub fn clear_file(path: &Path) -> Result<(), AuthError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(AuthError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// File-based token storage.
///
/// Stores tokens as individual JSON files per slot in a directory,
/// by default `<home>/.pingcli/credentials/<slot>.json`.
///
/// # Security
/// - File permissions are set to 0600 (owner read/write only) on Unix
/// - The directory is created with 0700 permissions
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    /// Directory where token files are stored.
    dir: PathBuf,
}

impl FileTokenStorage {
    /// Create a new FileTokenStorage with the specified directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a FileTokenStorage rooted at the default credentials directory.
    pub fn in_home() -> Result<Self, AuthError> {
        Ok(Self::new(credentials_dir()?))
    }

    /// Get the directory where tokens are stored.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the file path for a slot, creating the directory if needed.
    pub fn credentials_path(&self, slot: &str) -> Result<PathBuf, AuthError> {
        self.ensure_dir()?;
        Ok(self.slot_path(slot))
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{slot}.{CREDENTIALS_EXT}"))
    }

    /// Ensure the storage directory exists with correct permissions.
    fn ensure_dir(&self) -> Result<(), AuthError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|source| AuthError::Io {
                path: self.dir.clone(),
                source,
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(DIR_MODE);
                std::fs::set_permissions(&self.dir, perms).map_err(|source| AuthError::Io {
                    path: self.dir.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl TokenStorage for FileTokenStorage {
    #[instrument(skip(self))]
    fn load(&self, slot: &str) -> Result<Option<TokenInfo>, AuthError> {
        match load_from_file(&self.slot_path(slot)) {
            Ok(token) => Ok(Some(token)),
            Err(e) if e.is_cache_miss() => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, token))]
    fn save(&self, slot: &str, token: &TokenInfo) -> Result<(), AuthError> {
        if !token.is_present() {
            return Err(AuthError::NilToken);
        }
        let path = self.credentials_path(slot)?;
        save_to_file(&path, token)?;
        debug!(path = %path.display(), "Token saved to file");
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, slot: &str) -> Result<(), AuthError> {
        clear_file(&self.slot_path(slot))
    }

    fn exists(&self, slot: &str) -> Result<bool, AuthError> {
        Ok(self.slot_path(slot).exists())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// =============================================================================
// KeyringTokenStorage
// =============================================================================

/// Keyring-based token storage.
///
/// Uses the system's native credential store (Keychain, Credential Manager,
/// kernel keyutils). Entries live under a constant service namespace with
/// the slot key as the account; tokens are serialized to JSON.
///
/// Feature-gated behind `system-keyring`.
#[cfg(feature = "system-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringTokenStorage {
    /// Service name (namespace) for keyring entries.
    service: String,
}

#[cfg(feature = "system-keyring")]
impl Default for KeyringTokenStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-keyring")]
impl KeyringTokenStorage {
    /// Namespace identifying this tool in the system keyring.
    pub const SERVICE_NAME: &str = "pingcli";

    /// Create a new KeyringTokenStorage with the default namespace.
    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
        }
    }

    /// Create a KeyringTokenStorage with a custom namespace.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, slot: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, slot)
            .map_err(|e| AuthError::Keyring(format!("Failed to create keyring entry: {}", e)))
    }
}

#[cfg(feature = "system-keyring")]
impl TokenStorage for KeyringTokenStorage {
    #[instrument(skip(self))]
    fn load(&self, slot: &str) -> Result<Option<TokenInfo>, AuthError> {
        let entry = self.entry(slot)?;
        match entry.get_password() {
            Ok(password) => {
                let token: TokenInfo = serde_json::from_str(&password).map_err(|e| {
                    AuthError::Keyring(format!("Failed to parse token from keyring: {}", e))
                })?;
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Keyring(e.to_string())),
        }
    }

    #[instrument(skip(self, token))]
    fn save(&self, slot: &str, token: &TokenInfo) -> Result<(), AuthError> {
        if !token.is_present() {
            return Err(AuthError::NilToken);
        }
        let entry = self.entry(slot)?;
        let json = serde_json::to_string(token)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize token: {}", e)))?;
        entry
            .set_password(&json)
            .map_err(|e| AuthError::Keyring(e.to_string()))?;
        debug!("Token saved to keyring");
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, slot: &str) -> Result<(), AuthError> {
        let entry = self.entry(slot)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Keyring(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

// =============================================================================
// MemoryTokenStorage
// =============================================================================

/// In-memory token storage.
///
/// Uses `Arc<RwLock<HashMap>>` for thread-safe access. Useful for
/// testing and for embedding callers that manage persistence themselves.
/// The storage is Clone and clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStorage {
    inner: Arc<RwLock<HashMap<String, TokenInfo>>>,
}

impl MemoryTokenStorage {
    /// Create a new empty MemoryTokenStorage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored tokens.
    pub fn len(&self) -> usize {
        self.inner.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Check if storage is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> AuthError {
        AuthError::Storage("memory storage lock poisoned".to_string())
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self, slot: &str) -> Result<Option<TokenInfo>, AuthError> {
        let guard = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(guard.get(slot).cloned())
    }

    fn save(&self, slot: &str, token: &TokenInfo) -> Result<(), AuthError> {
        if !token.is_present() {
            return Err(AuthError::NilToken);
        }
        let mut guard = self.inner.write().map_err(|_| Self::poisoned())?;
        guard.insert(slot.to_string(), token.clone());
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<(), AuthError> {
        let mut guard = self.inner.write().map_err(|_| Self::poisoned())?;
        guard.remove(slot);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
