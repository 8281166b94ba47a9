//! Storage backend selection with per-operation fallback.
//!
//! The preferred backend is the system keyring unless
//! `login.storage.useKeychain` is false. The preference is read from
//! configuration on every operation. A keyring failure falls back to the
//! file backend for that single operation and is logged at `debug`; the
//! caller only sees an error when every consulted backend failed.

use std::sync::Arc;
use tracing::debug;

use super::AuthError;
use super::storage::{FileTokenStorage, TokenStorage};
use super::token::TokenInfo;
use crate::config::{ConfigSource, keys, parse_bool};

/// Chooses between the secure store and the file backend per operation.
#[derive(Clone)]
pub struct StorageSelector {
    secure: Option<Arc<dyn TokenStorage>>,
    file: Arc<dyn TokenStorage>,
    settings: Arc<dyn ConfigSource>,
}

impl std::fmt::Debug for StorageSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSelector")
            .field("secure", &self.secure.as_ref().map(|s| s.name().to_string()))
            .field("file", &self.file.name())
            .finish()
    }
}

impl StorageSelector {
    /// Create a selector over explicit backends.
    ///
    /// `secure` is `None` when no secure store exists on this build.
    pub fn new(
        secure: Option<Arc<dyn TokenStorage>>,
        file: Arc<dyn TokenStorage>,
        settings: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            secure,
            file,
            settings,
        }
    }

    /// Create a selector over the system keyring (when compiled in) and
    /// `<home>/.pingcli/credentials`.
    pub fn with_default_backends(settings: Arc<dyn ConfigSource>) -> Result<Self, AuthError> {
        #[cfg(feature = "system-keyring")]
        let secure: Option<Arc<dyn TokenStorage>> =
            Some(Arc::new(super::storage::KeyringTokenStorage::new()));
        #[cfg(not(feature = "system-keyring"))]
        let secure: Option<Arc<dyn TokenStorage>> = None;

        Ok(Self::new(
            secure,
            Arc::new(FileTokenStorage::in_home()?),
            settings,
        ))
    }

    /// Whether the secure store should be tried first. Defaults to true.
    pub fn prefers_secure_store(&self) -> bool {
        self.settings
            .lookup(keys::STORAGE_USE_KEYCHAIN)
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true)
    }

    /// Backends to consult, preferred first.
    fn backends(&self) -> Vec<&Arc<dyn TokenStorage>> {
        match &self.secure {
            Some(secure) if self.prefers_secure_store() => vec![secure, &self.file],
            _ => vec![&self.file],
        }
    }

    /// Save a token, falling back to the file backend if the keyring fails.
    pub fn save(&self, slot: &str, token: &TokenInfo) -> Result<(), AuthError> {
        if !token.is_present() {
            return Err(AuthError::NilToken);
        }

        let mut errors = Vec::new();
        for backend in self.backends() {
            match backend.save(slot, token) {
                Ok(()) => {
                    debug!(backend = backend.name(), slot, "Token saved");
                    return Ok(());
                }
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Token save failed, trying next backend");
                    errors.push(e);
                }
            }
        }
        Err(collapse(errors))
    }

    /// Load a token from the preferred backend, then the other.
    ///
    /// `Ok(None)` means no backend holds the slot. An error is returned only
    /// when every consulted backend failed.
    pub fn load(&self, slot: &str) -> Result<Option<TokenInfo>, AuthError> {
        let mut errors = Vec::new();
        let mut consulted = 0;
        for backend in self.backends() {
            consulted += 1;
            match backend.load(slot) {
                Ok(Some(token)) => {
                    debug!(backend = backend.name(), slot, "Token loaded");
                    return Ok(Some(token));
                }
                Ok(None) => {
                    debug!(backend = backend.name(), slot, "No token stored");
                }
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Token load failed, trying next backend");
                    errors.push(e);
                }
            }
        }

        if !errors.is_empty() && errors.len() == consulted {
            return Err(collapse(errors));
        }
        Ok(None)
    }

    /// Remove the slot from every backend, regardless of preference.
    ///
    /// A token may have been written under an earlier preference, so both
    /// backends are always attempted. Nothing stored is not an error. Any
    /// backend failures are reported together once both have been tried.
    pub fn clear(&self, slot: &str) -> Result<(), AuthError> {
        let mut errors = Vec::new();
        for backend in self.secure.iter().chain(std::iter::once(&self.file)) {
            match backend.remove(slot) {
                Ok(()) => debug!(backend = backend.name(), slot, "Token cleared"),
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Token clear failed");
                    errors.push(e);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(collapse(errors))
        }
    }

    /// Whether any consulted backend holds the slot. Backend errors count as absent.
    pub fn has(&self, slot: &str) -> bool {
        self.backends()
            .into_iter()
            .any(|backend| backend.exists(slot).unwrap_or(false))
    }
}

fn collapse(mut errors: Vec<AuthError>) -> AuthError {
    if errors.len() == 1 {
        errors.remove(0)
    } else {
        AuthError::Backends(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::storage::MemoryTokenStorage;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A secure store that is always unavailable.
    struct UnavailableStorage;

    impl TokenStorage for UnavailableStorage {
        fn load(&self, _slot: &str) -> Result<Option<TokenInfo>, AuthError> {
            Err(AuthError::Keyring("no storage access".into()))
        }
        fn save(&self, _slot: &str, _token: &TokenInfo) -> Result<(), AuthError> {
            Err(AuthError::Keyring("no storage access".into()))
        }
        fn remove(&self, _slot: &str) -> Result<(), AuthError> {
            Err(AuthError::Keyring("no storage access".into()))
        }
        fn name(&self) -> &str {
            "unavailable"
        }
    }

    /// Settings whose values can change between operations.
    #[derive(Default)]
    struct MutableSettings(Mutex<HashMap<String, String>>);

    impl MutableSettings {
        fn set(&self, key: &str, value: &str) {
            self.0.lock().unwrap().insert(key.into(), value.into());
        }
    }

    impl ConfigSource for MutableSettings {
        fn lookup(&self, key: &str) -> Option<String> {
            self.0.lock().unwrap().get(key).cloned()
        }
    }

    fn no_settings() -> Arc<dyn ConfigSource> {
        Arc::new(HashMap::<String, String>::new())
    }

    fn token(access: &str) -> TokenInfo {
        TokenInfo::new(access.into(), None, Some(3600))
    }

    fn selector(
        secure: Arc<dyn TokenStorage>,
        file: Arc<dyn TokenStorage>,
        settings: Arc<dyn ConfigSource>,
    ) -> StorageSelector {
        StorageSelector::new(Some(secure), file, settings)
    }

    #[test]
    fn test_prefers_secure_store_by_default() {
        let secure = MemoryTokenStorage::new();
        let file = MemoryTokenStorage::new();
        let sel = selector(
            Arc::new(secure.clone()),
            Arc::new(file.clone()),
            no_settings(),
        );

        assert!(sel.prefers_secure_store());
        sel.save("token-a", &token("access")).unwrap();
        assert_eq!(secure.len(), 1);
        assert!(file.is_empty());
        assert_eq!(sel.load("token-a").unwrap().unwrap().access_token, "access");
    }

    #[test]
    fn test_file_only_skips_secure_store() {
        let secure = MemoryTokenStorage::new();
        secure.save("token-a", &token("stale-keyring")).unwrap();
        let file = MemoryTokenStorage::new();
        let settings = HashMap::from([(keys::STORAGE_USE_KEYCHAIN.to_string(), "false".to_string())]);
        let sel = selector(Arc::new(secure.clone()), Arc::new(file.clone()), Arc::new(settings));

        assert!(sel.load("token-a").unwrap().is_none());
        assert!(!sel.has("token-a"));

        sel.save("token-a", &token("access")).unwrap();
        assert_eq!(file.len(), 1);
        assert_eq!(
            secure.load("token-a").unwrap().unwrap().access_token,
            "stale-keyring"
        );
    }

    #[test]
    fn test_fallback_round_trip_when_secure_store_fails() {
        let file = MemoryTokenStorage::new();
        let sel = selector(
            Arc::new(UnavailableStorage),
            Arc::new(file.clone()),
            no_settings(),
        );

        sel.save("token-a", &token("access")).unwrap();
        assert_eq!(file.len(), 1);
        assert_eq!(sel.load("token-a").unwrap().unwrap().access_token, "access");
        assert!(sel.has("token-a"));
    }

    #[test]
    fn test_load_falls_back_on_secure_miss() {
        let file = MemoryTokenStorage::new();
        file.save("token-a", &token("from-file")).unwrap();
        let sel = selector(
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(file),
            no_settings(),
        );
        assert_eq!(sel.load("token-a").unwrap().unwrap().access_token, "from-file");
    }

    #[test]
    fn test_load_miss_everywhere_is_none() {
        let sel = selector(
            Arc::new(UnavailableStorage),
            Arc::new(MemoryTokenStorage::new()),
            no_settings(),
        );
        assert!(sel.load("token-a").unwrap().is_none());
    }

    #[test]
    fn test_save_fails_only_when_both_fail() {
        let sel = selector(
            Arc::new(UnavailableStorage),
            Arc::new(UnavailableStorage),
            no_settings(),
        );
        match sel.save("token-a", &token("access")) {
            Err(AuthError::Backends(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(sel.load("token-a").is_err());
    }

    #[test]
    fn test_save_rejects_nil_token_before_io() {
        let secure = MemoryTokenStorage::new();
        let file = MemoryTokenStorage::new();
        let sel = selector(
            Arc::new(secure.clone()),
            Arc::new(file.clone()),
            no_settings(),
        );
        let result = sel.save("token-a", &TokenInfo::new(String::new(), None, None));
        assert!(matches!(result, Err(AuthError::NilToken)));
        assert!(secure.is_empty() && file.is_empty());
    }

    #[test]
    fn test_clear_removes_from_both_backends() {
        let secure = MemoryTokenStorage::new();
        let file = MemoryTokenStorage::new();
        secure.save("token-a", &token("one")).unwrap();
        file.save("token-a", &token("two")).unwrap();
        let settings = HashMap::from([(keys::STORAGE_USE_KEYCHAIN.to_string(), "false".to_string())]);
        let sel = selector(Arc::new(secure.clone()), Arc::new(file.clone()), Arc::new(settings));

        sel.clear("token-a").unwrap();
        assert!(secure.is_empty());
        assert!(file.is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let sel = selector(
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(MemoryTokenStorage::new()),
            no_settings(),
        );
        sel.clear("token-a").unwrap();
        sel.clear("token-a").unwrap();
    }

    #[test]
    fn test_clear_reports_failing_secure_store_after_clearing_file() {
        let file = MemoryTokenStorage::new();
        file.save("token-a", &token("access")).unwrap();
        let sel = selector(
            Arc::new(UnavailableStorage),
            Arc::new(file.clone()),
            no_settings(),
        );

        assert!(matches!(sel.clear("token-a"), Err(AuthError::Keyring(_))));
        assert!(file.is_empty());
    }

    #[test]
    fn test_clear_joins_errors_from_every_backend() {
        let sel = selector(
            Arc::new(UnavailableStorage),
            Arc::new(UnavailableStorage),
            no_settings(),
        );
        assert!(matches!(sel.clear("token-a"), Err(AuthError::Backends(_))));
    }

    #[test]
    fn test_preference_is_read_per_operation() {
        let secure = MemoryTokenStorage::new();
        let file = MemoryTokenStorage::new();
        let settings = Arc::new(MutableSettings::default());
        let sel = selector(Arc::new(secure.clone()), Arc::new(file.clone()), settings.clone());

        sel.save("token-a", &token("keyring")).unwrap();
        settings.set(keys::STORAGE_USE_KEYCHAIN, "off");
        sel.save("token-b", &token("file")).unwrap();

        assert!(secure.exists("token-a").unwrap());
        assert!(file.exists("token-b").unwrap());
        assert!(!file.exists("token-a").unwrap());
    }

    #[test]
    fn test_unparseable_preference_defaults_to_secure() {
        let settings = HashMap::from([(keys::STORAGE_USE_KEYCHAIN.to_string(), "maybe".to_string())]);
        let sel = selector(
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(MemoryTokenStorage::new()),
            Arc::new(settings),
        );
        assert!(sel.prefers_secure_store());
    }

    #[test]
    fn test_without_secure_store_uses_file() {
        let file = MemoryTokenStorage::new();
        let sel = StorageSelector::new(None, Arc::new(file.clone()), no_settings());
        sel.save("token-a", &token("access")).unwrap();
        assert_eq!(file.len(), 1);
        sel.clear("token-a").unwrap();
        assert!(file.is_empty());
    }

    #[test]
    fn test_real_file_backend_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let sel = selector(
            Arc::new(UnavailableStorage),
            Arc::new(FileTokenStorage::new(dir.path())),
            no_settings(),
        );
        let original = token("access");
        sel.save("token-a", &original).unwrap();
        assert_eq!(sel.load("token-a").unwrap().unwrap(), original);
        assert!(dir.path().join("token-a.json").exists());
    }
}
