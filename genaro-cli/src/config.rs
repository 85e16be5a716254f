//! Configuration and key management
//!
//! Handles storing and loading CLI configuration and the bridge signing key.
//! Config directory: ~/.genaro/ (cross-platform)
//!
//! Config file format (~/.genaro/config.toml):
//! ```toml
//! [bridge]
//! url = "https://bridge.genaro.network"
//! key_file = "/home/me/.genaro/id_ed25519"
//!
//! [transfer]
//! max_concurrent_shards = 4
//! bridge_timeout_secs = 60
//!
//! [cli]
//! default_bucket = "5f1c0ffee0ddba11c0ffee00"
//! ```

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use genaro_transfer::TransferConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Structure of ~/.genaro/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenaroConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Transfer engine tuning
    #[serde(default)]
    pub transfer: TransferSettings,

    /// CLI-specific settings
    #[serde(default)]
    pub cli: CliSettings,
}

/// Bridge connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "default_bridge_url")]
    pub url: String,

    /// Hex-encoded Ed25519 secret key used to sign bridge requests.
    /// Defaults to ~/.genaro/id_ed25519.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            key_file: None,
        }
    }
}

fn default_bridge_url() -> String {
    std::env::var("GENARO_BRIDGE_URL")
        .unwrap_or_else(|_| "https://bridge.genaro.network".to_string())
}

/// Transfer settings; unset keys take the engine defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub max_concurrent_shards: usize,
    pub max_shard_requests: u32,
    pub max_pointer_replacements: u32,
    pub max_push_attempts: u32,
    pub max_bridge_attempts: u32,
    pub bridge_timeout_secs: u64,
    pub farmer_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub report_drain_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        let defaults = TransferConfig::from_env().unwrap_or_default();
        Self {
            max_concurrent_shards: defaults.max_concurrent_shards,
            max_shard_requests: defaults.max_shard_requests,
            max_pointer_replacements: defaults.max_pointer_replacements,
            max_push_attempts: defaults.max_push_attempts,
            max_bridge_attempts: defaults.max_bridge_attempts,
            bridge_timeout_secs: defaults.bridge_timeout.as_secs(),
            farmer_timeout_secs: defaults.farmer_timeout.as_secs(),
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            report_drain_ms: defaults.report_drain.as_millis() as u64,
        }
    }
}

impl TransferSettings {
    /// Engine configuration with these settings applied
    pub fn to_transfer_config(&self) -> Result<TransferConfig> {
        TransferConfig {
            max_concurrent_shards: self.max_concurrent_shards,
            max_shard_requests: self.max_shard_requests,
            max_pointer_replacements: self.max_pointer_replacements,
            max_push_attempts: self.max_push_attempts,
            max_bridge_attempts: self.max_bridge_attempts,
            bridge_timeout: Duration::from_secs(self.bridge_timeout_secs),
            farmer_timeout: Duration::from_secs(self.farmer_timeout_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            report_drain: Duration::from_millis(self.report_drain_ms),
            ..TransferConfig::default()
        }
        .validated()
        .context("Invalid [transfer] configuration")
    }
}

/// CLI-specific settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliSettings {
    /// Default bucket id for operations
    #[serde(default)]
    pub default_bucket: Option<String>,
}

/// Get the config directory path (~/.genaro/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let config_dir = home.join(".genaro");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("Failed to create config directory ~/.genaro/")?;
    }

    Ok(config_dir)
}

/// Get the config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration from file
/// Falls back to defaults if file doesn't exist
pub fn load_config() -> GenaroConfig {
    match config_file_path() {
        Ok(path) if path.exists() => match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    GenaroConfig::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                GenaroConfig::default()
            }
        },
        _ => GenaroConfig::default(),
    }
}

/// Save configuration to file
pub fn save_config(config: &GenaroConfig) -> Result<()> {
    let path = config_file_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(&path, content).context("Failed to write config file")?;
    Ok(())
}

/// Update one `section.key` entry
pub fn set_value(config: &mut GenaroConfig, key: &str, value: String) -> Result<()> {
    fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
        value
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, value))
    }

    let transfer = &mut config.transfer;
    match key {
        "bridge.url" => config.bridge.url = value,
        "bridge.key_file" => config.bridge.key_file = Some(PathBuf::from(value)),
        "cli.default_bucket" => config.cli.default_bucket = Some(value),
        "transfer.max_concurrent_shards" => transfer.max_concurrent_shards = parse(key, &value)?,
        "transfer.max_shard_requests" => transfer.max_shard_requests = parse(key, &value)?,
        "transfer.max_pointer_replacements" => {
            transfer.max_pointer_replacements = parse(key, &value)?
        }
        "transfer.max_push_attempts" => transfer.max_push_attempts = parse(key, &value)?,
        "transfer.max_bridge_attempts" => transfer.max_bridge_attempts = parse(key, &value)?,
        "transfer.bridge_timeout_secs" => transfer.bridge_timeout_secs = parse(key, &value)?,
        "transfer.farmer_timeout_secs" => transfer.farmer_timeout_secs = parse(key, &value)?,
        "transfer.retry_delay_ms" => transfer.retry_delay_ms = parse(key, &value)?,
        "transfer.report_drain_ms" => transfer.report_drain_ms = parse(key, &value)?,
        _ => anyhow::bail!(
            "Unknown config key: {}. Valid keys: bridge.url, bridge.key_file, cli.default_bucket, transfer.*",
            key
        ),
    }
    Ok(())
}

/// Path of the signing key file
pub fn key_file_path(config: &GenaroConfig) -> Result<PathBuf> {
    match &config.bridge.key_file {
        Some(path) => Ok(path.clone()),
        None => Ok(config_dir()?.join("id_ed25519")),
    }
}

/// Load the signing key, creating a new one on first use
pub fn load_or_create_key(path: &Path) -> Result<SigningKey> {
    if path.exists() {
        let content = fs::read_to_string(path).context("Failed to read key file")?;
        let bytes = hex::decode(content.trim()).context("Key file is not valid hex")?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Key file must hold a 32-byte secret key"))?;
        return Ok(SigningKey::from_bytes(&secret));
    }

    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let content = hex::encode(key.to_bytes());

    // Set restrictive permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, &content).context("Failed to write key file")?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, content).context("Failed to write key file")?;
    }

    Ok(key)
}
