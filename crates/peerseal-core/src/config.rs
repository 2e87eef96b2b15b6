//! Configuration resolution for `PeerSeal`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/peerseal/settings.json)
//! 3. Explicit config file (when given)
//! 4. Environment variables (highest priority)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Shortest confirmation code we accept.
pub const MIN_CODE_LENGTH: usize = 1;

/// Longest confirmation code we accept.
pub const MAX_CODE_LENGTH: usize = 12;

/// Minimum salt size in bytes for confirmation-code key derivation.
pub const MIN_SALT_LEN: usize = 8;

/// Complete `PeerSeal` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub keys: KeyConfig,
    #[serde(default)]
    pub confirm_code: ConfirmCodeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where private keys are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreBackend {
    /// Process-local map, lost on exit.
    Memory,
    /// Owner-only files under `store_dir`.
    #[default]
    File,
}

/// Access-control policy attached to a persisted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Readable once the device has been unlocked after boot; never migrates
    /// to another device.
    #[default]
    AfterFirstUnlockThisDeviceOnly,
    /// Readable only while the device is unlocked; never migrates.
    WhenUnlockedThisDeviceOnly,
    /// Readable once the device has been unlocked after boot.
    AfterFirstUnlock,
}

/// Key management configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Namespace (service) that scopes every key identity.
    pub namespace: String,
    /// Name of the long-lived key used by permanent invites.
    pub permanent_key_name: String,
    pub store: KeyStoreBackend,
    /// Directory for the file store. Falls back to [`key_store_dir`].
    pub store_dir: Option<PathBuf>,
    pub access_policy: AccessPolicy,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            namespace: "peerseal".to_string(),
            permanent_key_name: "e2ee.permanent".to_string(),
            store: KeyStoreBackend::default(),
            store_dir: None,
            access_policy: AccessPolicy::default(),
        }
    }
}

/// Confirmation code configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmCodeConfig {
    /// Number of digits in a confirmation code. Both peers must agree.
    pub length: usize,
    /// Hex-encoded salt for the shared-key derivation. `None` uses the
    /// built-in constant.
    pub salt_hex: Option<String>,
}

impl Default for ConfirmCodeConfig {
    fn default() -> Self {
        Self {
            length: 4,
            salt_hex: None,
        }
    }
}

impl ConfirmCodeConfig {
    /// Decode the configured salt, if any.
    pub fn salt(&self) -> Result<Option<Vec<u8>>> {
        let Some(salt_hex) = &self.salt_hex else {
            return Ok(None);
        };
        let salt = hex::decode(salt_hex.trim())
            .map_err(|e| Error::Config(format!("Invalid confirm_code.salt_hex: {e}")))?;
        if salt.len() < MIN_SALT_LEN {
            return Err(Error::Config(format!(
                "confirm_code.salt_hex must decode to at least {MIN_SALT_LEN} bytes, got {}",
                salt.len()
            )));
        }
        Ok(Some(salt))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default env-filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Check cross-field constraints after all sources are merged.
    pub fn validate(&self) -> Result<()> {
        if self.keys.namespace.is_empty() {
            return Err(Error::Config("keys.namespace must not be empty".into()));
        }
        if self.keys.permanent_key_name.is_empty() {
            return Err(Error::Config(
                "keys.permanent_key_name must not be empty".into(),
            ));
        }
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&self.confirm_code.length) {
            return Err(Error::Config(format!(
                "confirm_code.length must be within {MIN_CODE_LENGTH}..={MAX_CODE_LENGTH}, got {}",
                self.confirm_code.length
            )));
        }
        self.confirm_code.salt()?;
        Ok(())
    }

    /// Directory the file key store should use.
    pub fn resolved_store_dir(&self) -> Result<PathBuf> {
        self.keys
            .store_dir
            .clone()
            .or_else(key_store_dir)
            .ok_or_else(|| Error::Config("No key store directory could be determined".into()))
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` must exist when given; the global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_config_file(&mut config, &global_path)?;
        }
    }

    if let Some(path) = explicit {
        merge_config_file(&mut config, path)?;
    }

    apply_env_overrides(&mut config);
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_root().map(|p| p.join("settings.json"))
}

/// Default directory for persisted private keys.
pub fn key_store_dir() -> Option<PathBuf> {
    config_root().map(|p| p.join("keys"))
}

fn config_root() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".peerseal"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/peerseal"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("peerseal"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Layer the file at `path` over `base`. Only keys present in the file
/// change `base`.
fn merge_config_file(base: &mut Config, path: &Path) -> Result<()> {
    let overlay = load_config_file(path)?;
    merge_config(base, overlay).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

fn merge_config(base: &mut Config, overlay: Value) -> Result<()> {
    let mut merged = serde_json::to_value(&*base)?;
    merge_json(&mut merged, overlay);
    *base = serde_json::from_value(merged)?;
    Ok(())
}

/// Recursive object merge; any non-object overlay value replaces the base.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply `PEERSEAL_*` overrides using `lookup` as the variable source.
fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("PEERSEAL_NAMESPACE") {
        config.keys.namespace = val;
    }
    if let Some(val) = lookup("PEERSEAL_KEY_DIR") {
        config.keys.store_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("PEERSEAL_CODE_LENGTH") {
        match val.parse() {
            Ok(n) => config.confirm_code.length = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring unparsable PEERSEAL_CODE_LENGTH"),
        }
    }
    if let Some(val) = lookup("PEERSEAL_CONFIRM_SALT") {
        config.confirm_code.salt_hex = Some(val);
    }
    if let Some(val) = lookup("PEERSEAL_LOG_LEVEL") {
        config.logging.level = val;
    }
}
