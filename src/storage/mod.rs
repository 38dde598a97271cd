//! Storage for collected metrics.
//!
//! A [`Repo`] owns the authoritative metric collection; two implementations
//! exist, [`MemoryRepo`] (optionally snapshotted to a JSON file) and
//! [`PostgresRepo`]. Transports never talk to a repo directly: they go
//! through [`MetricsStorage`], which validates input and bounds every call
//! with a timeout.

use crate::core::{CollectorError, Metric, MetricKind, Result, StorageConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod backend;
pub mod memory;
pub mod postgres;

// Re-export commonly used types
pub use backend::Repo;
pub use memory::{MemoryOptions, MemoryRepo};
pub use postgres::PostgresRepo;

/// Validating, time-bounded facade over a [`Repo`].
#[derive(Clone)]
pub struct MetricsStorage {
    repo: Arc<dyn Repo>,
    timeout: Duration,
}

impl MetricsStorage {
    /// Wrap an existing repository.
    pub fn new(repo: Arc<dyn Repo>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    /// Open the repository selected by configuration.
    ///
    /// A non-empty DSN selects PostgreSQL, otherwise the in-memory repo is
    /// used with the configured snapshot file.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let repo: Arc<dyn Repo> = match config.dsn() {
            Some(dsn) => {
                tracing::info!("Using PostgreSQL storage");
                Arc::new(
                    PostgresRepo::connect(dsn, &config.migrations_dir, config.retries.clone())
                        .await?,
                )
            },
            None => {
                tracing::info!(
                    "Using in-memory storage (file: {}, interval: {:?}, restore: {})",
                    config.file_path.display(),
                    config.store_interval,
                    config.restore
                );
                Arc::new(MemoryRepo::open(MemoryOptions::from(config)).await?)
            },
        };

        Ok(Self::new(repo, config.timeout))
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| CollectorError::timeout(self.timeout))?
    }

    /// All stored metrics.
    pub async fn get_all(&self) -> Result<Vec<Metric>> {
        self.bounded(self.repo.get_all()).await
    }

    /// One metric by kind and name; an unknown kind is `WrongType`.
    pub async fn get_value(&self, kind: &str, name: &str) -> Result<Option<Metric>> {
        let kind: MetricKind = kind.parse()?;
        self.bounded(self.repo.get_value(kind, name)).await
    }

    /// Validate and merge one metric, updating counters to their new total.
    pub async fn update(&self, metric: &mut Metric) -> Result<()> {
        metric.validate()?;
        self.bounded(self.repo.update(metric)).await
    }

    /// Validate every metric, then merge the set.
    pub async fn update_many(&self, metrics: &[Metric]) -> Result<()> {
        for metric in metrics {
            metric.validate()?;
        }
        self.bounded(self.repo.update_many(metrics)).await
    }

    /// Liveness of the underlying repository.
    pub async fn ping(&self) -> bool {
        match self.bounded(self.repo.ping()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Storage ping failed: {}", e);
                false
            },
        }
    }

    /// Close the repository.
    pub async fn close(&self) -> Result<()> {
        self.repo.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowRepo;

    #[async_trait]
    impl Repo for SlowRepo {
        async fn get_all(&self) -> Result<Vec<Metric>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn get_value(&self, _kind: MetricKind, _name: &str) -> Result<Option<Metric>> {
            Ok(None)
        }

        async fn update(&self, _metric: &mut Metric) -> Result<()> {
            Ok(())
        }

        async fn update_many(&self, _metrics: &[Metric]) -> Result<()> {
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            Err(CollectorError::storage("unreachable"))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_calls_are_time_bounded() {
        let storage = MetricsStorage::new(Arc::new(SlowRepo), Duration::from_millis(20));
        let err = storage.get_all().await.unwrap_err();
        assert!(matches!(err, CollectorError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_ping_collapses_to_bool() {
        let storage = MetricsStorage::new(Arc::new(SlowRepo), Duration::from_secs(1));
        assert!(!storage.ping().await);

        let memory = MetricsStorage::new(Arc::new(MemoryRepo::new()), Duration::from_secs(1));
        assert!(memory.ping().await);
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected_before_query() {
        let storage = MetricsStorage::new(Arc::new(MemoryRepo::new()), Duration::from_secs(1));
        let err = storage.get_value("histogram", "Alloc").await.unwrap_err();
        assert!(matches!(err, CollectorError::WrongType));
    }

    #[tokio::test]
    async fn test_invalid_metric_never_reaches_repo() {
        let storage = MetricsStorage::new(Arc::new(MemoryRepo::new()), Duration::from_secs(1));

        let batch = vec![Metric::gauge("Alloc", 1.0), Metric::counter("", 1)];
        let err = storage.update_many(&batch).await.unwrap_err();
        assert!(matches!(err, CollectorError::WrongName));
        assert!(storage.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_absent_metric_is_not_an_error() {
        let storage = MetricsStorage::new(Arc::new(MemoryRepo::new()), Duration::from_secs(1));
        assert!(storage.get_value("counter", "doesNotExist").await.unwrap().is_none());
    }
}
