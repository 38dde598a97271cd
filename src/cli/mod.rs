//! Command-line interfaces for the collector and the agent.
//!
//! Configuration is layered: defaults, then the optional YAML file, then
//! flags and environment variables. Only values actually given on the
//! command line or in the environment override the file.

use crate::core::{
    AgentConfig, AgentConfigBuilder, Backoff, CollectorError, Result, ServerConfig,
    ServerConfigBuilder, TransportKind,
};
use clap::Parser;
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Metrics collector server
#[derive(Parser, Debug, Default)]
#[command(name = "metrix-server")]
#[command(version, about, long_about = None)]
pub struct ServerCli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC listen address
    #[arg(short = 'g', long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Snapshot period of the in-memory storage, 0s saves on every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL", value_parser = parse_duration)]
    pub store_interval: Option<Duration>,

    /// Snapshot file of the in-memory storage
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// Load the snapshot on startup
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// PostgreSQL connection string
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Shared HMAC key
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM file with the RSA private key
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Trusted subnet in CIDR notation
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<IpNet>,

    /// Storage call timeout
    #[arg(long, env = "STORE_TIMEOUT", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Graceful shutdown timeout
    #[arg(long, env = "SHUTDOWN_TIMEOUT", value_parser = parse_duration)]
    pub shutdown: Option<Duration>,

    /// Retry intervals for storage connections, e.g. "1s,3s,5s"
    #[arg(long, env = "RETRIES")]
    pub retries: Option<Backoff>,

    /// Directory of database migrations
    #[arg(long, env = "MIGRATIONS")]
    pub migrations: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

impl ServerCli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the server configuration from file and overrides.
    pub fn load_config(&self) -> Result<ServerConfig> {
        let mut builder = ServerConfigBuilder::new();
        if let Some(path) = &self.config {
            builder = builder.from_file(path)?;
            tracing::info!("Loaded configuration from: {:?}", path);
        }

        if let Some(address) = &self.address {
            builder = builder.address(address.clone());
        }
        if let Some(address) = &self.grpc_address {
            builder = builder.grpc_address(Some(address.clone()).filter(|a| !a.is_empty()));
        }
        if let Some(interval) = self.store_interval {
            builder = builder.store_interval(interval);
        }
        if let Some(path) = &self.file_storage_path {
            builder = builder.file_path(path.clone());
        }
        if let Some(restore) = self.restore {
            builder = builder.restore(restore);
        }
        if let Some(dsn) = &self.database_dsn {
            builder = builder.dsn(dsn.clone());
        }
        if let Some(key) = &self.key {
            builder = builder.key(key.clone());
        }
        if let Some(path) = &self.crypto_key {
            builder = builder.private_key_path(path.clone());
        }
        if let Some(subnet) = self.trusted_subnet {
            builder = builder.trusted_subnet(subnet);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.storage_timeout(timeout);
        }
        if let Some(timeout) = self.shutdown {
            builder = builder.shutdown_timeout(timeout);
        }
        if let Some(retries) = &self.retries {
            builder = builder.retries(retries.clone());
        }
        if let Some(dir) = &self.migrations {
            builder = builder.migrations_dir(dir.clone());
        }

        builder.debug(self.debug).build()
    }
}

/// Metrics agent
#[derive(Parser, Debug, Default)]
#[command(name = "metrix-agent")]
#[command(version, about, long_about = None)]
pub struct AgentCli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Collector address
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Transport used to reach the collector (http or grpc)
    #[arg(long, env = "TRANSPORT")]
    pub transport: Option<TransportKind>,

    /// Reporting period
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Polling period
    #[arg(short = 'p', long, env = "POLL_INTERVAL", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Shared HMAC key
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Number of concurrent senders
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// PEM file with the collector's RSA public key
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Per-attempt send timeout
    #[arg(long, env = "SEND_TIMEOUT", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Metrics per request
    #[arg(long = "batch", env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Retry intervals on refused connections, e.g. "1s,3s,5s"
    #[arg(long, env = "RETRIES")]
    pub retries: Option<Backoff>,

    /// Address reported in X-Real-IP instead of the detected one
    #[arg(long, env = "REAL_IP")]
    pub real_ip: Option<IpAddr>,

    /// Enable debug logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

impl AgentCli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the agent configuration from file and overrides.
    pub fn load_config(&self) -> Result<AgentConfig> {
        let mut builder = AgentConfigBuilder::new();
        if let Some(path) = &self.config {
            builder = builder.from_file(path)?;
            tracing::info!("Loaded configuration from: {:?}", path);
        }

        if let Some(address) = &self.address {
            builder = builder.server_address(address.clone());
        }
        if let Some(transport) = self.transport {
            builder = builder.transport(transport);
        }
        if let Some(interval) = self.report_interval {
            builder = builder.report_interval(interval);
        }
        if let Some(interval) = self.poll_interval {
            builder = builder.poll_interval(interval);
        }
        if let Some(key) = &self.key {
            builder = builder.key(key.clone());
        }
        if let Some(workers) = self.rate_limit {
            builder = builder.rate_limit(workers);
        }
        if let Some(path) = &self.crypto_key {
            builder = builder.public_key_path(path.clone());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(size) = self.batch_size {
            builder = builder.batch_size(size);
        }
        if let Some(retries) = &self.retries {
            builder = builder.retries(retries.clone());
        }
        if let Some(ip) = self.real_ip {
            builder = builder.real_ip(ip);
        }

        builder.debug(self.debug).build()
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the `debug` flag when set.
pub fn init_logging(debug: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .try_init()
        .map_err(|e| CollectorError::config(format!("Failed to initialize logging: {}", e)))
}

/// Token cancelled on SIGINT, SIGTERM or SIGQUIT.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Received shutdown signal");
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut quit) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) {
        (Ok(terminate), Ok(quit)) => (terminate, quit),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Failed to install signal handlers: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
        _ = quit.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
