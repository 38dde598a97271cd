//! Common test utilities and fixtures.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use metrix_lib::core::ServerConfig;
use metrix_lib::server::{Security, Server};
use metrix_lib::storage::{MemoryRepo, MetricsStorage};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// In-memory storage without persistence.
pub fn memory_storage() -> MetricsStorage {
    MetricsStorage::new(Arc::new(MemoryRepo::new()), Duration::from_secs(5))
}

/// A collector running on ephemeral ports.
pub struct TestServer {
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub storage: MetricsStorage,
    shutdown: CancellationToken,
    handle: JoinHandle<metrix_lib::Result<()>>,
}

impl TestServer {
    pub async fn start(security: Security) -> Self {
        let config = ServerConfig {
            address: "127.0.0.1:0".into(),
            grpc_address: Some("127.0.0.1:0".into()),
            ..Default::default()
        };
        let storage = memory_storage();
        let server = Server::bind_with(&config, storage.clone(), Arc::new(security))
            .await
            .unwrap();

        let http_addr = server.http_addr().unwrap();
        let grpc_addr = server.grpc_addr().unwrap().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        Self {
            http_addr,
            grpc_addr,
            storage,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http_addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
