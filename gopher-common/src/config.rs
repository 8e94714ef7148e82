//! Configuration loading and resolution
//!
//! The burrow reads one TOML file. Resolution order for the file path:
//! 1. Command-line argument (highest priority)
//! 2. `GOPHER_BURROW_CONFIG` environment variable
//! 3. `~/.config/imagegopher/burrow.toml` if present
//! 4. Compiled defaults (no file)
//!
//! `GOPHER_BURROW_CONFIG_REQUIRED` (any of `1`, `true`, `yes`) turns a
//! missing file into a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "GOPHER_BURROW_CONFIG";

/// Environment variable making the configuration file mandatory
pub const CONFIG_REQUIRED_ENV_VAR: &str = "GOPHER_BURROW_CONFIG_REQUIRED";

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Fingerprint trust policy for submitted reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustMode {
    /// Accept scanner-computed fingerprints
    Trusted,
    /// Always recompute fingerprints from the bytes
    #[default]
    Untrusted,
}

/// What happens to tags that lose their last member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TagRetention {
    /// Keep empty tags as vocabulary
    #[default]
    Keep,
    /// Delete empty tags during maintenance sweeps
    PruneEmpty,
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// `[database]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `<data dir>/imagegopher/burrow.db`
    pub filename: Option<PathBuf>,
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// `[ingest]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub trust_mode: TrustMode,
    /// Seconds a location may be absent before its record becomes missing
    pub missing_grace_secs: u64,
    /// Upper bound on waiting for a per-key lock
    pub lock_timeout_ms: u64,
    /// Attempts for a storage operation hitting a transient failure
    pub storage_retry_attempts: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            trust_mode: TrustMode::Untrusted,
            missing_grace_secs: 7 * 24 * 3600,
            lock_timeout_ms: 5000,
            storage_retry_attempts: 5,
        }
    }
}

/// `[retention]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub tags: TagRetention,
    /// Purge records missing for this many days; absent = keep forever
    pub missing_purge_after_days: Option<u32>,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            tags: TagRetention::Keep,
            missing_purge_after_days: None,
            sweep_interval_secs: 300,
        }
    }
}

/// `[gatherer]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GathererConfig {
    pub gatherer_host: String,
    pub gatherer_port: u16,
    pub wait_for_ok: bool,
    pub wait_for_ok_retries: u32,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            gatherer_host: "http://127.0.0.1".to_string(),
            gatherer_port: 3001,
            wait_for_ok: false,
            wait_for_ok_retries: 12,
        }
    }
}

/// Complete burrow configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BurrowConfig {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub retention: RetentionConfig,
    pub gatherer: GathererConfig,
}

impl BurrowConfig {
    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::Config(format!(
                "logging.log_level '{}' is not one of {:?}",
                self.logging.log_level, VALID_LOG_LEVELS
            )));
        }

        if self.server.port == 0 {
            return Err(Error::Config("server.port must be non-zero".to_string()));
        }

        if self.gatherer.wait_for_ok_retries == 0 {
            return Err(Error::Config(
                "Gatherer health check retries of 0 or below is invalid".to_string(),
            ));
        }

        if self.ingest.storage_retry_attempts == 0 {
            return Err(Error::Config(
                "ingest.storage_retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.retention.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "retention.sweep_interval_secs must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Database path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database
            .filename
            .clone()
            .unwrap_or_else(|| default_data_dir().join("burrow.db"))
    }
}

/// Parse a configuration file
pub fn load_config_file(path: &Path) -> Result<BurrowConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: BurrowConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Write a configuration file (temp file + rename)
pub fn write_toml_config(config: &BurrowConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve and load the configuration
///
/// Returns the configuration and the file it came from (None = defaults).
pub fn resolve_burrow_config(cli_path: Option<&Path>) -> Result<(BurrowConfig, Option<PathBuf>)> {
    let required = std::env::var(CONFIG_REQUIRED_ENV_VAR)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    // Priority 1 and 2: explicit paths must exist
    let explicit = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config = load_config_file(&path)?;
        return Ok((config, Some(path)));
    }

    // Priority 3: user config file
    if let Some(path) = user_config_path().filter(|p| p.exists()) {
        let config = load_config_file(&path)?;
        return Ok((config, Some(path)));
    }

    if required {
        return Err(Error::Config("Configuration file missing!".to_string()));
    }

    // Priority 4: compiled defaults
    Ok((BurrowConfig::default(), None))
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("imagegopher").join("burrow.toml"))
}

/// OS-dependent default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("imagegopher"))
        .unwrap_or_else(|| PathBuf::from("./imagegopher_data"))
}
