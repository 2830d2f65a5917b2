//! Configuration management for the mixer gateway
//!
//! Handles loading and validating the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs;

use crate::protocol::DEFAULT_BUFFER_CAPACITY;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Mixer engine connection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_upstream_port")]
    pub port: u16,
    /// Largest inbound frame accepted before the connection is dropped
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Reconnect and rediscover after the connection closes, instead of exiting
    #[serde(default = "default_true")]
    pub reconnect: bool,
}

/// Browser-facing HTTP and WebSocket server
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Also write a daily rolling log file in the logs directory
    #[serde(default)]
    pub file: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            port: default_upstream_port(),
            buffer_capacity: default_buffer_capacity(),
            reconnect: default_true(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            port: default_http_port(),
            static_dir: default_static_dir(),
        }
    }
}

impl UpstreamConfig {
    /// `host:port` as passed to the TCP connector
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid HTTP bind address: {}:{}", self.bind, self.port))
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Apply a `HOST:PORT` override for the upstream connection
    pub fn override_upstream(&mut self, address: &str) -> Result<()> {
        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("Upstream address must be HOST:PORT, got '{}'", address))?;
        self.upstream.port = port
            .parse()
            .with_context(|| format!("Invalid upstream port in '{}'", address))?;
        self.upstream.host = host.to_string();
        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.upstream.host.is_empty() {
            anyhow::bail!("upstream.host cannot be empty");
        }
        if self.upstream.port == 0 {
            anyhow::bail!("upstream.port must be non-zero");
        }
        if self.upstream.buffer_capacity == 0 {
            anyhow::bail!("upstream.buffer_capacity must be greater than zero");
        }

        if self.http.bind.is_empty() {
            anyhow::bail!("http.bind cannot be empty");
        }
        if self.http.port == 0 {
            anyhow::bail!("http.port must be non-zero");
        }
        self.http.socket_addr()?;

        Ok(())
    }
}

// Default value functions
fn default_upstream_host() -> String { "127.0.0.1".to_string() }
fn default_upstream_port() -> u16 { 4710 }
fn default_buffer_capacity() -> usize { DEFAULT_BUFFER_CAPACITY }
fn default_true() -> bool { true }
fn default_http_bind() -> String { "0.0.0.0".to_string() }
fn default_http_port() -> u16 { 8080 }
fn default_static_dir() -> String { "public".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.upstream.address(), "127.0.0.1:4710");
        assert_eq!(config.upstream.buffer_capacity, 16 * 1024);
        assert!(config.upstream.reconnect);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.static_dir, "public");
        assert!(!config.logging.file);
        config.validate().unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("config.yaml"))
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_file_overrides_named_fields_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "upstream:\n  port: 5000\nhttp:\n  static_dir: www\n").unwrap();

        let config = AppConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config.upstream.host, "127.0.0.1");
        assert_eq!(config.upstream.port, 5000);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.static_dir, "www");
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "upstream:\n  buffer_capacity: 0\n").unwrap();

        let err = AppConfig::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("buffer_capacity"));
    }

    #[tokio::test]
    async fn test_example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.yaml");
        assert_eq!(AppConfig::load(&path).await.unwrap(), AppConfig::default());
    }

    #[test]
    fn test_upstream_override() {
        let mut config = AppConfig::default();
        config.override_upstream("mixer.local:4800").unwrap();
        assert_eq!(config.upstream.address(), "mixer.local:4800");

        assert!(config.override_upstream("mixer.local").is_err());
        assert!(config.override_upstream("mixer.local:http").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.upstream.host.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.http.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.http.bind = "not an address".into();
        assert!(config.validate().is_err());
    }
}
