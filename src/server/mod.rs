//! Collector server.
//!
//! The HTTP listener and the optional gRPC listener run side by side over one
//! [`MetricsStorage`]. When the shutdown token fires, or either listener
//! stops, both listeners are drained within the configured shutdown timeout
//! and the storage is closed last.

use crate::core::crypto;
use crate::core::{CollectorError, Result, SecurityConfig, ServerConfig};
use crate::storage::MetricsStorage;
use ipnet::IpNet;
use rsa::RsaPrivateKey;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod grpc;
pub mod http;

/// Correlation id attached to every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key material and access control shared by both transports.
#[derive(Debug, Default)]
pub struct Security {
    pub key: Option<Vec<u8>>,
    pub private_key: Option<RsaPrivateKey>,
    pub trusted_subnet: Option<IpNet>,
}

impl Security {
    /// Load key files referenced by configuration.
    pub fn load(config: &SecurityConfig) -> Result<Self> {
        let private_key = config
            .private_key_path
            .as_deref()
            .map(crypto::load_private_key)
            .transpose()?;

        Ok(Self {
            key: config.key_bytes().map(<[u8]>::to_vec),
            private_key,
            trusted_subnet: config.trusted_subnet,
        })
    }
}

/// Collector with bound listeners, ready to run.
pub struct Server {
    http: TcpListener,
    grpc: Option<TcpListener>,
    storage: MetricsStorage,
    security: Arc<Security>,
    shutdown_timeout: Duration,
}

impl Server {
    /// Open storage, load keys and bind the listeners.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let security = Arc::new(Security::load(&config.security)?);
        let storage = MetricsStorage::open(&config.storage).await?;
        Self::bind_with(config, storage, security).await
    }

    /// Bind the listeners around an already opened storage.
    pub async fn bind_with(
        config: &ServerConfig,
        storage: MetricsStorage,
        security: Arc<Security>,
    ) -> Result<Self> {
        let http = bind(&config.address).await?;
        let grpc = match config.grpc_address.as_deref().filter(|a| !a.is_empty()) {
            Some(address) => Some(bind(address).await?),
            None => None,
        };

        Ok(Self {
            http,
            grpc,
            storage,
            security,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    pub fn grpc_addr(&self) -> Result<Option<SocketAddr>> {
        self.grpc
            .as_ref()
            .map(TcpListener::local_addr)
            .transpose()
            .map_err(Into::into)
    }

    /// Serve until `shutdown` fires or a listener fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let group = CancellationToken::new();
        let mut listeners = JoinSet::new();

        tracing::info!("HTTP server listening on {}", self.http_addr()?);
        listeners.spawn(http::serve(
            self.http,
            http::AppState::new(self.storage.clone(), Arc::clone(&self.security)),
            group.clone(),
        ));

        if let Some(listener) = self.grpc {
            tracing::info!("gRPC server listening on {}", listener.local_addr()?);
            listeners.spawn(grpc::serve(
                listener,
                grpc::StorageService::new(self.storage.clone()),
                self.security.trusted_subnet,
                group.clone(),
            ));
        }

        let mut outcome = Ok(());
        tokio::select! {
            _ = shutdown.cancelled() => tracing::info!("Shutdown signal received"),
            Some(joined) = listeners.join_next() => {
                tracing::warn!("Listener stopped unexpectedly");
                record(&mut outcome, joined);
            }
        }
        group.cancel();

        let drain = async {
            while let Some(joined) = listeners.join_next().await {
                record(&mut outcome, joined);
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            tracing::warn!(
                "Listeners did not stop within {:?}, aborting",
                self.shutdown_timeout
            );
            listeners.abort_all();
        }

        if let Err(e) = self.storage.close().await {
            tracing::error!("Failed to close storage: {}", e);
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }

        tracing::info!("Server stopped");
        outcome
    }
}

async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|e| CollectorError::network(format!("Failed to bind {}: {}", address, e)))
}

fn record(
    outcome: &mut Result<()>,
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
) {
    if let Err(e) = joined.map_err(CollectorError::from).and_then(|r| r) {
        tracing::error!("Listener failed: {}", e);
        if outcome.is_ok() {
            *outcome = Err(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRepo;

    fn config() -> ServerConfig {
        ServerConfig {
            address: "127.0.0.1:0".into(),
            grpc_address: Some("127.0.0.1:0".into()),
            ..Default::default()
        }
    }

    fn storage() -> MetricsStorage {
        MetricsStorage::new(Arc::new(MemoryRepo::new()), Duration::from_secs(1))
    }

    #[test]
    fn test_security_ignores_empty_key() {
        let config = SecurityConfig {
            key: Some(String::new()),
            ..Default::default()
        };
        let security = Security::load(&config).unwrap();
        assert!(security.key.is_none());
        assert!(security.private_key.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = Server::bind_with(&config(), storage(), Arc::default())
            .await
            .unwrap();
        assert!(server.grpc_addr().unwrap().is_some());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = Server::bind_with(&config(), storage(), Arc::default())
            .await
            .unwrap();
        let taken = ServerConfig {
            address: first.http_addr().unwrap().to_string(),
            grpc_address: None,
            ..Default::default()
        };

        let err = Server::bind_with(&taken, storage(), Arc::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CollectorError::Network(_)));
    }
}
