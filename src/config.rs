use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Config file permissions (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Config directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

// ---------------------------------------------------------------------------
// Configuration lookup seam
// ---------------------------------------------------------------------------

/// Key -> string lookup consumed by the credential subsystem.
///
/// Keys are dotted option names (see [`keys`]). Implementations must read
/// their backing state on every call; callers never cache the result.
pub trait ConfigSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

impl ConfigSource for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Option keys understood by pingcli.
pub mod keys {
    pub const AUTH_TYPE: &str = "service.pingOne.authentication.type";
    pub const REGION_CODE: &str = "service.pingOne.regionCode";

    pub const DEVICE_CODE_CLIENT_ID: &str = "service.pingOne.authentication.deviceCode.clientID";
    pub const DEVICE_CODE_ENVIRONMENT_ID: &str =
        "service.pingOne.authentication.deviceCode.environmentID";
    pub const DEVICE_CODE_SCOPES: &str = "service.pingOne.authentication.deviceCode.scopes";

    pub const AUTH_CODE_CLIENT_ID: &str =
        "service.pingOne.authentication.authorizationCode.clientID";
    pub const AUTH_CODE_ENVIRONMENT_ID: &str =
        "service.pingOne.authentication.authorizationCode.environmentID";
    pub const AUTH_CODE_REDIRECT_URI: &str =
        "service.pingOne.authentication.authorizationCode.redirectURI";
    pub const AUTH_CODE_SCOPES: &str = "service.pingOne.authentication.authorizationCode.scopes";

    pub const CLIENT_CREDENTIALS_CLIENT_ID: &str =
        "service.pingOne.authentication.clientCredentials.clientID";
    pub const CLIENT_CREDENTIALS_CLIENT_SECRET: &str =
        "service.pingOne.authentication.clientCredentials.clientSecret";
    pub const CLIENT_CREDENTIALS_ENVIRONMENT_ID: &str =
        "service.pingOne.authentication.clientCredentials.environmentID";
    pub const CLIENT_CREDENTIALS_SCOPES: &str =
        "service.pingOne.authentication.clientCredentials.scopes";

    pub const STORAGE_USE_KEYCHAIN: &str = "login.storage.useKeychain";

    pub const LOG_LEVEL: &str = "logging.level";
    pub const LOG_JSON: &str = "logging.json";
}

/// A known option and the environment variable that overrides it.
#[derive(Debug, Clone, Copy)]
pub struct ConfigOption {
    pub key: &'static str,
    pub env_var: &'static str,
    /// Whether the value must be masked when displayed.
    pub sensitive: bool,
}

const fn opt(key: &'static str, env_var: &'static str) -> ConfigOption {
    ConfigOption {
        key,
        env_var,
        sensitive: false,
    }
}

/// Every option with an environment override.
pub const OPTIONS: &[ConfigOption] = &[
    opt(keys::AUTH_TYPE, "PINGCLI_PINGONE_AUTHENTICATION_TYPE"),
    opt(keys::REGION_CODE, "PINGCLI_PINGONE_REGION_CODE"),
    opt(keys::DEVICE_CODE_CLIENT_ID, "PINGCLI_PINGONE_DEVICE_CODE_CLIENT_ID"),
    opt(
        keys::DEVICE_CODE_ENVIRONMENT_ID,
        "PINGCLI_PINGONE_DEVICE_CODE_ENVIRONMENT_ID",
    ),
    opt(keys::DEVICE_CODE_SCOPES, "PINGCLI_PINGONE_DEVICE_CODE_SCOPES"),
    opt(
        keys::AUTH_CODE_CLIENT_ID,
        "PINGCLI_PINGONE_AUTHORIZATION_CODE_CLIENT_ID",
    ),
    opt(
        keys::AUTH_CODE_ENVIRONMENT_ID,
        "PINGCLI_PINGONE_AUTHORIZATION_CODE_ENVIRONMENT_ID",
    ),
    opt(
        keys::AUTH_CODE_REDIRECT_URI,
        "PINGCLI_PINGONE_AUTHORIZATION_CODE_REDIRECT_URI",
    ),
    opt(
        keys::AUTH_CODE_SCOPES,
        "PINGCLI_PINGONE_AUTHORIZATION_CODE_SCOPES",
    ),
    opt(
        keys::CLIENT_CREDENTIALS_CLIENT_ID,
        "PINGCLI_PINGONE_CLIENT_CREDENTIALS_CLIENT_ID",
    ),
    ConfigOption {
        key: keys::CLIENT_CREDENTIALS_CLIENT_SECRET,
        env_var: "PINGCLI_PINGONE_CLIENT_CREDENTIALS_CLIENT_SECRET",
        sensitive: true,
    },
    opt(
        keys::CLIENT_CREDENTIALS_ENVIRONMENT_ID,
        "PINGCLI_PINGONE_CLIENT_CREDENTIALS_ENVIRONMENT_ID",
    ),
    opt(
        keys::CLIENT_CREDENTIALS_SCOPES,
        "PINGCLI_PINGONE_CLIENT_CREDENTIALS_SCOPES",
    ),
    opt(keys::STORAGE_USE_KEYCHAIN, "PINGCLI_LOGIN_STORAGE_USE_KEYCHAIN"),
    opt(keys::LOG_LEVEL, "PINGCLI_LOG_LEVEL"),
    opt(keys::LOG_JSON, "PINGCLI_LOG_JSON"),
];

/// Look up the option definition for a key.
pub fn option_for(key: &str) -> Option<&'static ConfigOption> {
    OPTIONS.iter().find(|o| o.key == key)
}

/// Parse the boolean spellings accepted in config files and env vars.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: BTreeMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

/// Logging settings for the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// pingcli configuration: a TOML file flattened to dotted keys.
///
/// Environment variables from [`OPTIONS`] are consulted on every
/// [`lookup`](ConfigSource::lookup), not captured at load time, so a value
/// exported between two operations is always observed.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    /// Default config file location: `<home>/.pingcli/config.toml`.
    ///
    /// `PINGCLI_CONFIG` takes precedence when set.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        if let Ok(path) = std::env::var("PINGCLI_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to resolve the user home directory"))?;
        Ok(home.join(".pingcli").join("config.toml"))
    }

    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {e}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut values = BTreeMap::new();
        flatten_table("", &table, &mut values);
        Ok(Self { values })
    }

    /// The file-level value of a key, ignoring environment overrides.
    pub fn file_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set a file-level value. Persist with [`save`](Self::save).
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Save the file-level configuration (without env overrides) as TOML.
    ///
    /// The file can hold a client secret, so it is written owner-only, and a
    /// missing parent directory is created owner-only too.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let table = unflatten(&self.values)?;
        let content = toml::to_string_pretty(&table)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let temp_path = path.with_extension("toml.tmp");
        write_private(&temp_path, content.as_bytes())?;
        if let Err(e) = std::fs::rename(&temp_path, path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Settings currently overridden by an environment variable.
    pub fn env_overrides(&self) -> EnvOverrides {
        let mut ov = EnvOverrides::default();
        for option in OPTIONS {
            if std::env::var(option.env_var).is_ok() {
                ov.record(option.key, option.env_var);
            }
        }
        ov
    }

    /// Effective logging settings.
    pub fn logging(&self) -> LoggingConfig {
        let defaults = LoggingConfig::default();
        LoggingConfig {
            level: self.lookup(keys::LOG_LEVEL).unwrap_or(defaults.level),
            json: self
                .lookup(keys::LOG_JSON)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.json),
        }
    }
}

impl ConfigSource for Config {
    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(option) = option_for(key) {
            if let Ok(val) = std::env::var(option.env_var) {
                return Some(val);
            }
        }
        self.values.get(key).cloned()
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match value {
            toml::Value::Table(inner) => flatten_table(&key, inner, out),
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(|item| match item {
                        toml::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                out.insert(key, joined);
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}

fn unflatten(values: &BTreeMap<String, String>) -> anyhow::Result<toml::Table> {
    let mut root = toml::Table::new();
    for (key, value) in values {
        let mut parts: Vec<&str> = key.split('.').collect();
        let leaf = parts
            .pop()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Invalid config key: '{key}'"))?;

        let mut table = &mut root;
        for part in parts {
            let entry = table
                .entry(part.to_string())
                .or_insert(toml::Value::Table(toml::Table::new()));
            table = match entry {
                toml::Value::Table(t) => t,
                _ => anyhow::bail!("Config key '{key}' conflicts with an existing value"),
            };
        }
        if table.contains_key(leaf) {
            anyhow::bail!("Config key '{key}' conflicts with an existing section");
        }
        table.insert(leaf.to_string(), toml::Value::String(value.clone()));
    }
    Ok(root)
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(dir)
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(path)?;
        // A leftover file keeps its old mode on open.
        file.set_permissions(std::fs::Permissions::from_mode(FILE_MODE))?;
        file.write_all(content)
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, content)
    }
}
