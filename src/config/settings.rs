//! Configuration structures for logship

use crate::types::{ExtraDetails, LogLevel};
use crate::{Result, ShipError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for layered configuration
pub const ENV_PREFIX: &str = "LOGSHIP";

/// Shipper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    /// Name of this shipper, used in logs
    pub identifier: String,
    /// Where the staging directories live
    pub storage: StorageLocation,
    /// Rules every queued item must satisfy
    pub item: ItemSettings,
    /// Collector endpoint
    pub endpoint: EndpointSettings,
    /// Retry timer settings
    pub retry: RetrySettings,
    /// Event logger settings
    pub logging: LoggingSettings,
}

/// Location of the staging root
///
/// Directories created are:
/// `{base_directory}/{app_name}/{parent_directory}/Inbox`,
/// `.../Outbox` and `.../Sent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLocation {
    /// Base directory, the platform data directory by default
    pub base_directory: PathBuf,
    /// Application name
    pub app_name: String,
    /// Sub-directory holding the three stages
    pub parent_directory: String,
}

/// Queued item rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemSettings {
    /// Required file extension, compared case-insensitively
    pub extension: String,
    /// Maximum item size in bytes
    pub size_limit: u64,
}

/// Collector endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Base URL uploads are PUT to
    pub url: String,
    /// Symmetric HMAC key (UTF-8). Uploads are unsigned when absent.
    pub signing_key: Option<String>,
    /// Per-request transport timeout in seconds
    pub timeout_seconds: u64,
}

/// Retry timer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Seconds between retry sweeps
    pub interval_seconds: u64,
}

/// Event logger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Events less severe than this are not queued
    pub min_level: LogLevel,
    /// Extra details stamped onto every event
    pub extra_details: Option<ExtraDetails>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            identifier: "logship".to_string(),
            storage: StorageLocation::default(),
            item: ItemSettings::default(),
            endpoint: EndpointSettings::default(),
            retry: RetrySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for StorageLocation {
    fn default() -> Self {
        Self {
            base_directory: dirs::data_dir().unwrap_or_else(std::env::temp_dir),
            app_name: "logship".to_string(),
            parent_directory: "EventQueue".to_string(),
        }
    }
}

impl Default for ItemSettings {
    fn default() -> Self {
        Self {
            extension: "json".to_string(),
            size_limit: 64 * 1024,
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/log.cgi".to_string(),
            signing_key: None,
            timeout_seconds: 60,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            interval_seconds: 2 * 60,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Error,
            extra_details: None,
        }
    }
}

impl StorageLocation {
    /// Root directory holding the three stages
    pub fn root(&self) -> PathBuf {
        self.base_directory
            .join(&self.app_name)
            .join(&self.parent_directory)
    }
}

impl ItemSettings {
    /// Extension without a leading dot
    pub fn normalized_extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }
}

impl EndpointSettings {
    /// Parsed endpoint URL
    pub fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| ShipError::Config(format!("Invalid endpoint URL {}: {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ShipError::Config(format!(
                "Endpoint URL must be http or https, got {}",
                other
            ))),
        }
    }

    /// Signing key bytes, if configured
    pub fn key_bytes(&self) -> Option<&[u8]> {
        self.signing_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(str::as_bytes)
    }

    /// Transport timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RetrySettings {
    /// Retry timer period
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl ShipperConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShipError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ShipperConfig = toml::from_str(&content)
            .map_err(|e| ShipError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults, an optional TOML file and
    /// `LOGSHIP__SECTION__KEY` environment variables, in that order
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&ShipperConfig::default())
            .map_err(|e| ShipError::Config(format!("Failed to build defaults: {}", e)))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: ShipperConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ShipError::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(ShipError::Config("Identifier cannot be empty".to_string()));
        }
        if self.storage.app_name.is_empty() || self.storage.parent_directory.is_empty() {
            return Err(ShipError::Config(
                "Storage app name and parent directory cannot be empty".to_string(),
            ));
        }
        let extension = self.item.normalized_extension();
        if extension.is_empty() || extension.contains(['.', '/', '\\']) {
            return Err(ShipError::Config(format!(
                "Invalid item extension: {:?}",
                self.item.extension
            )));
        }
        if self.item.size_limit == 0 {
            return Err(ShipError::Config("Item size limit must be positive".to_string()));
        }
        if self.endpoint.timeout_seconds == 0 {
            return Err(ShipError::Config("Endpoint timeout must be positive".to_string()));
        }
        if self.retry.interval_seconds == 0 {
            return Err(ShipError::Config("Retry interval must be positive".to_string()));
        }
        self.endpoint.parsed_url()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ShipperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.item.extension, "json");
        assert_eq!(config.retry.interval(), Duration::from_secs(120));
        assert_eq!(config.logging.min_level, LogLevel::Error);
        assert!(config.endpoint.key_bytes().is_none());
        assert!(config.storage.root().ends_with("logship/EventQueue"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ShipperConfig::default();
        config.item.extension = "event.json".to_string();
        assert!(matches!(config.validate(), Err(ShipError::Config(_))));

        let mut config = ShipperConfig::default();
        config.endpoint.url = "ftp://example.com/upload".to_string();
        assert!(config.validate().is_err());

        let mut config = ShipperConfig::default();
        config.endpoint.url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = ShipperConfig::default();
        config.retry.interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ShipperConfig::default();
        config.item.size_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_leading_dot_extension_is_accepted() {
        let mut config = ShipperConfig::default();
        config.item.extension = ".JSON".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.item.normalized_extension(), "JSON");
    }

    #[test]
    fn test_from_file_partial_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logship.toml");
        std::fs::write(
            &path,
            r#"
identifier = "checkout-app"

[storage]
base_directory = "/var/tmp/queues"

[endpoint]
url = "https://collector.example.com/log.cgi"
signing_key = "Hello World"

[retry]
interval_seconds = 30
"#,
        )
        .unwrap();

        let config = ShipperConfig::from_file(&path).unwrap();
        assert_eq!(config.identifier, "checkout-app");
        assert_eq!(
            config.storage.root(),
            PathBuf::from("/var/tmp/queues/logship/EventQueue")
        );
        assert_eq!(config.endpoint.key_bytes(), Some(&b"Hello World"[..]));
        assert_eq!(config.retry.interval_seconds, 30);
        assert_eq!(config.item.size_limit, 64 * 1024);
    }

    #[test]
    fn test_from_file_missing() {
        let result = ShipperConfig::from_file("/nonexistent/logship.toml");
        assert!(matches!(result, Err(ShipError::Config(_))));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = ShipperConfig::load(None).unwrap();
        assert_eq!(config.identifier, ShipperConfig::default().identifier);
    }

    #[test]
    fn test_load_layers_file_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logship.toml");
        std::fs::write(&path, "[item]\nsize_limit = 512\n").unwrap();

        let config = ShipperConfig::load(Some(&path)).unwrap();
        assert_eq!(config.item.size_limit, 512);
        assert_eq!(config.item.extension, "json");
    }
}
