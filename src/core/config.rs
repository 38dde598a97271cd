//! Configuration for the collector server and the agent.
//!
//! Both configurations support:
//! - YAML file support
//! - CLI and environment overrides (applied by the binaries)
//! - Validation and defaults

use crate::core::retry::Backoff;
use crate::core::{CollectorError, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration for the collector server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the HTTP transport
    pub address: String,
    /// Listen address of the gRPC transport, disabled when absent
    pub grpc_address: Option<String>,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Integrity, confidentiality and access control
    pub security: SecurityConfig,
    /// Upper bound for graceful shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// PostgreSQL connection string; the in-memory repo is used when empty
    pub dsn: Option<String>,
    /// Directory holding SQL migrations
    pub migrations_dir: PathBuf,
    /// Snapshot file of the in-memory repo
    pub file_path: PathBuf,
    /// Snapshot period; zero saves after every update
    #[serde(with = "humantime_serde")]
    pub store_interval: Duration,
    /// Load the snapshot on startup
    pub restore: bool,
    /// Budget for a single storage call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Waits between attempts on transient failures
    pub retries: Backoff,
}

/// HTTP header carrying the caller's declared address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// gRPC metadata key carrying the caller's declared address.
pub const REAL_IP_METADATA: &str = "x-real-ip";

/// Security configuration shared by the transports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared HMAC key
    pub key: Option<String>,
    /// PEM file with the RSA private key used to decrypt payloads
    pub private_key_path: Option<PathBuf>,
    /// Only callers whose X-Real-IP falls inside this network are accepted
    pub trusted_subnet: Option<IpNet>,
}

impl SecurityConfig {
    /// HMAC key bytes, ignoring an empty key.
    pub fn key_bytes(&self) -> Option<&[u8]> {
        self.key.as_deref().filter(|k| !k.is_empty()).map(str::as_bytes)
    }
}

/// Transport used by the agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
}

impl std::str::FromStr for TransportKind {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "grpc" => Ok(TransportKind::Grpc),
            other => Err(CollectorError::config(format!("unknown transport '{other}'"))),
        }
    }
}

/// Complete configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector address (`host:port`)
    pub server_address: String,
    /// Transport used to deliver batches
    pub transport: TransportKind,
    /// Scan period
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Send period
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
    /// Number of concurrent send workers
    pub rate_limit: usize,
    /// Metrics per request
    pub batch_size: usize,
    /// Budget for a single send attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Waits between attempts when the collector refuses connections
    pub retries: Backoff,
    /// Shared HMAC key
    pub key: Option<String>,
    /// PEM file with the collector's RSA public key
    pub public_key_path: Option<PathBuf>,
    /// Address advertised in X-Real-IP; detected when absent
    pub real_ip: Option<IpAddr>,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

impl AgentConfig {
    /// HMAC key bytes, ignoring an empty key.
    pub fn key_bytes(&self) -> Option<&[u8]> {
        self.key.as_deref().filter(|k| !k.is_empty()).map(str::as_bytes)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            grpc_address: Some("127.0.0.1:3200".to_string()),
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
            shutdown_timeout: Duration::from_secs(10),
            debug: false,
        }
    }
}

impl StorageConfig {
    /// Non-empty DSN selecting the relational repo
    pub fn dsn(&self) -> Option<&str> {
        self.dsn.as_deref().filter(|d| !d.is_empty())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            migrations_dir: PathBuf::from("migrations"),
            file_path: PathBuf::from("/tmp/metrics-db.json"),
            store_interval: Duration::from_secs(300),
            restore: true,
            timeout: Duration::from_secs(5),
            retries: Backoff::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8080".to_string(),
            transport: TransportKind::Http,
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 3,
            batch_size: 5,
            timeout: Duration::from_secs(5),
            retries: Backoff::default(),
            key: None,
            public_key_path: None,
            real_ip: None,
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(CollectorError::config("HTTP address must not be empty"));
        }

        if let Some(grpc) = &self.grpc_address {
            if grpc == &self.address {
                return Err(CollectorError::config(format!(
                    "HTTP and gRPC addresses must be different: both set to {}",
                    grpc
                )));
            }
        }

        if self.storage.timeout.is_zero() {
            return Err(CollectorError::config("storage timeout must be greater than 0"));
        }

        if self.storage.dsn.as_deref().map_or(true, str::is_empty)
            && self.storage.file_path.as_os_str().is_empty()
        {
            return Err(CollectorError::config("snapshot file path must not be empty"));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(CollectorError::config("shutdown timeout must be greater than 0"));
        }

        Ok(())
    }
}

impl AgentConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_address.is_empty() {
            return Err(CollectorError::config("server address must not be empty"));
        }

        if self.poll_interval.is_zero() || self.report_interval.is_zero() {
            return Err(CollectorError::config("poll and report intervals must be greater than 0"));
        }

        if self.rate_limit == 0 {
            return Err(CollectorError::config("rate_limit must be greater than 0"));
        }

        if self.batch_size == 0 {
            return Err(CollectorError::config("batch_size must be greater than 0"));
        }

        if self.timeout.is_zero() {
            return Err(CollectorError::config("timeout must be greater than 0"));
        }

        Ok(())
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(yaml: &str) -> Result<T> {
    serde_yaml::from_str(yaml)
        .map_err(|e| CollectorError::config(format!("Failed to parse YAML config: {}", e)))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        CollectorError::config(format!("Failed to read config {}: {}", path.display(), e))
    })
}

/// Server configuration builder
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = read_yaml(yaml)?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub fn from_file(self, path: &Path) -> Result<Self> {
        self.from_yaml(&read_file(path)?)
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn grpc_address(mut self, address: Option<String>) -> Self {
        self.config.grpc_address = address.filter(|a| !a.is_empty());
        self
    }

    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.config.storage.dsn = Some(dsn.into());
        self
    }

    pub fn migrations_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.migrations_dir = dir;
        self
    }

    pub fn file_path(mut self, path: PathBuf) -> Self {
        self.config.storage.file_path = path;
        self
    }

    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.config.storage.store_interval = interval;
        self
    }

    pub fn restore(mut self, restore: bool) -> Self {
        self.config.storage.restore = restore;
        self
    }

    pub fn storage_timeout(mut self, timeout: Duration) -> Self {
        self.config.storage.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: Backoff) -> Self {
        self.config.storage.retries = retries;
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.config.security.key = Some(key.into());
        self
    }

    pub fn private_key_path(mut self, path: PathBuf) -> Self {
        self.config.security.private_key_path = Some(path);
        self
    }

    pub fn trusted_subnet(mut self, subnet: IpNet) -> Self {
        self.config.security.trusted_subnet = Some(subnet);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Agent configuration builder
#[derive(Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = read_yaml(yaml)?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub fn from_file(self, path: &Path) -> Result<Self> {
        self.from_yaml(&read_file(path)?)
    }

    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.config.server_address = address.into();
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.report_interval = interval;
        self
    }

    pub fn rate_limit(mut self, workers: usize) -> Self {
        self.config.rate_limit = workers;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: Backoff) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.config.key = Some(key.into());
        self
    }

    pub fn public_key_path(mut self, path: PathBuf) -> Self {
        self.config.public_key_path = Some(path);
        self
    }

    pub fn real_ip(mut self, ip: IpAddr) -> Self {
        self.config.real_ip = Some(ip);
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<AgentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
