//! Configuration management for the WinInspect client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/wininspect/config.toml`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default daemon address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:1985";

/// Default identity name sent during authentication.
pub const DEFAULT_IDENTITY: &str = "wininspect-user";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("connect_timeout_secs must be greater than 0")]
    InvalidConnectTimeout,

    #[error("read_timeout_secs must be greater than 0")]
    InvalidReadTimeout,

    #[error("address must be host:port, got {0}")]
    InvalidAddress(String),

    #[error("identity must not be empty")]
    EmptyIdentity,

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// A configuration value taken from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    /// Environment variable that supplied the value.
    pub variable: &'static str,
    /// Value applied.
    pub value: String,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Connection and authentication settings.
    pub client: ClientConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Connection and authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon address as host:port.
    pub address: String,

    /// Private key used to answer the daemon's challenge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Identity name sent with the signature.
    pub identity: String,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Idle timeout for each frame read in seconds.
    pub read_timeout_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            key_path: None,
            identity: DEFAULT_IDENTITY.to_string(),
            connect_timeout_secs: 5,
            read_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl ClientConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wininspect")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WININSPECT_ADDRESS: Override daemon address
    /// - WININSPECT_KEY: Override private key path
    /// - WININSPECT_LOG_LEVEL: Override log level
    ///
    /// Returns the overrides that were applied so they can be logged once
    /// tracing is set up with the final log level.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverride> {
        let mut applied = Vec::new();

        if let Some(address) = non_empty_var("WININSPECT_ADDRESS") {
            self.client.address = address.clone();
            applied.push(EnvOverride {
                variable: "WININSPECT_ADDRESS",
                value: address,
            });
        }

        if let Some(key) = non_empty_var("WININSPECT_KEY") {
            self.client.key_path = Some(PathBuf::from(&key));
            applied.push(EnvOverride {
                variable: "WININSPECT_KEY",
                value: key,
            });
        }

        if let Some(level) = non_empty_var("WININSPECT_LOG_LEVEL") {
            self.logging.level = level.clone();
            applied.push(EnvOverride {
                variable: "WININSPECT_LOG_LEVEL",
                value: level,
            });
        }

        applied
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConnectTimeout);
        }

        if self.client.read_timeout_secs == 0 {
            return Err(ConfigError::InvalidReadTimeout);
        }

        let has_port = self
            .client
            .address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !has_port {
            return Err(ConfigError::InvalidAddress(self.client.address.clone()));
        }

        if self.client.identity.trim().is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file readable only by the owner.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;

        // `mode` only applies on creation.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict config file: {}", path.display()))?;
        }

        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("WININSPECT_ADDRESS");
        std::env::remove_var("WININSPECT_KEY");
        std::env::remove_var("WININSPECT_LOG_LEVEL");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.client.address, "127.0.0.1:1985");
        assert_eq!(config.client.key_path, None);
        assert_eq!(config.client.identity, "wininspect-user");
        assert_eq!(config.client.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.client.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[client]
key_path = "/home/user/.ssh/id_ed25519"
read_timeout_secs = 120
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(
            config.client.key_path,
            Some(PathBuf::from("/home/user/.ssh/id_ed25519"))
        );
        assert_eq!(config.client.read_timeout_secs, 120);
        assert_eq!(config.client.address, DEFAULT_ADDRESS);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[client\naddress = ");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML configuration"), "{}", err);
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[client]
read_timeout_secs = "soon"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[client]
address = "10.0.0.5:1985"
legacy_pipe = "\\\\.\\pipe\\wininspectd"

[extra]
anything = true
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.client.address, "10.0.0.5:1985");
    }

    #[test]
    fn test_to_toml_omits_unset_key() {
        let text = Config::default().to_toml().unwrap();
        assert!(text.contains("[client]"));
        assert!(text.contains("[logging]"));
        assert!(!text.contains("key_path"));
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut config = Config::default();
        config.client.address = "192.168.1.20:2000".to_string();
        config.client.key_path = Some(PathBuf::from("/keys/id"));
        config.logging.level = "debug".to_string();

        let parsed = Config::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.client.key_path = Some(PathBuf::from("/keys/id_wininspect"));
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        Config::default().save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_truncates_previous_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "x".repeat(4096)).unwrap();

        Config::default().save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"), "{}", err);
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("wininspect/config.toml"));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.client.connect_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidConnectTimeout));

        let mut config = Config::default();
        config.client.read_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReadTimeout));
    }

    #[test]
    fn test_validate_address() {
        for bad in ["localhost", ":1985", "host:", "host:99999", "host:port"] {
            let mut config = Config::default();
            config.client.address = bad.to_string();
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidAddress(bad.to_string())),
                "{} should be rejected",
                bad
            );
        }

        let mut config = Config::default();
        config.client.address = "winbox.lan:1985".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_identity() {
        let mut config = Config::default();
        config.client.identity = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyIdentity));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("WININSPECT_ADDRESS", "10.1.1.1:4000");
        std::env::set_var("WININSPECT_KEY", "/env/key");
        std::env::set_var("WININSPECT_LOG_LEVEL", "debug");

        let mut config = Config::default();
        let applied = config.apply_env_overrides();

        let variables: Vec<&str> = applied.iter().map(|o| o.variable).collect();
        assert_eq!(
            variables,
            ["WININSPECT_ADDRESS", "WININSPECT_KEY", "WININSPECT_LOG_LEVEL"]
        );
        assert_eq!(applied[1].value, "/env/key");
        assert_eq!(config.client.address, "10.1.1.1:4000");
        assert_eq!(config.client.key_path, Some(PathBuf::from("/env/key")));
        assert_eq!(config.logging.level, "debug");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("WININSPECT_ADDRESS", "");
        std::env::set_var("WININSPECT_KEY", "");

        let mut config = Config::default();
        assert!(config.apply_env_overrides().is_empty());

        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        assert!(config.apply_env_overrides().is_empty());

        assert_eq!(config, Config::default());
    }
}
