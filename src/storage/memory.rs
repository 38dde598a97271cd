//! In-memory repo with optional JSON snapshots.
//!
//! Metrics live in an ordered vector behind a read-write lock. When a
//! snapshot file is configured the repo runs in one of two modes:
//!
//! - **synchronous** (zero store interval): every `update` writes the whole
//!   collection to disk before returning, which also serializes updates;
//! - **periodic**: a background task saves on every tick and once more when
//!   the repo is closed.
//!
//! Saves write a temporary file and rename it over the snapshot, so a crash
//! never leaves a truncated file behind.

use super::Repo;
use crate::core::{
    retry_with_backoff, Backoff, CollectorError, Metric, MetricKind, Result, StorageConfig,
};
use parking_lot::{Mutex, RwLock};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Construction options for [`MemoryRepo`].
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Snapshot file; persistence is disabled when `None`.
    pub file_path: Option<PathBuf>,
    /// Zero means save after every update.
    pub store_interval: Duration,
    /// Load the snapshot on startup.
    pub restore: bool,
    /// Waits between attempts when the file is busy.
    pub retries: Backoff,
}

impl From<&StorageConfig> for MemoryOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            file_path: Some(config.file_path.clone()).filter(|p| !p.as_os_str().is_empty()),
            store_interval: config.store_interval,
            restore: config.restore,
            retries: config.retries.clone(),
        }
    }
}

/// Snapshot file with its retry schedule.
#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    retries: Backoff,
}

impl Snapshot {
    async fn save(&self, metrics: &[Metric]) -> Result<()> {
        let data = serde_json::to_vec(metrics)?;
        retry_with_backoff(&self.retries, is_busy, || write_replace(&self.path, &data)).await
    }

    async fn load(&self) -> Result<Vec<Metric>> {
        let path = &self.path;
        let read = retry_with_backoff(&self.retries, is_busy, move || async move {
            tokio::fs::read(path).await.map_err(CollectorError::from)
        })
        .await;

        let data = match read {
            Ok(data) => data,
            Err(CollectorError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No snapshot at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            },
            Err(e) => return Err(e),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }
}

fn is_busy(err: &CollectorError) -> bool {
    matches!(err, CollectorError::Io(e) if e.kind() == ErrorKind::ResourceBusy)
}

async fn write_replace(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// In-memory metric repository.
pub struct MemoryRepo {
    metrics: Arc<RwLock<Vec<Metric>>>,
    snapshot: Option<Arc<Snapshot>>,
    sync_save: bool,
    /// Serializes updates with their synchronous save.
    save_lock: tokio::sync::Mutex<()>,
    flusher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MemoryRepo {
    /// Repo without persistence.
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(Vec::new())),
            snapshot: None,
            sync_save: false,
            save_lock: tokio::sync::Mutex::new(()),
            flusher: Mutex::new(None),
        }
    }

    /// Open a repo, restoring the snapshot and starting the periodic flusher
    /// as configured.
    pub async fn open(options: MemoryOptions) -> Result<Self> {
        let mut repo = Self::new();
        let Some(path) = options.file_path else {
            return Ok(repo);
        };

        let snapshot = Arc::new(Snapshot {
            path,
            retries: options.retries,
        });

        if options.restore {
            let restored = snapshot.load().await?;
            tracing::info!(
                "Restored {} metrics from {}",
                restored.len(),
                snapshot.path.display()
            );
            *repo.metrics.write() = restored;
        }

        if options.store_interval.is_zero() {
            repo.sync_save = true;
        } else {
            let token = CancellationToken::new();
            let handle = tokio::spawn(flush_loop(
                Arc::clone(&repo.metrics),
                Arc::clone(&snapshot),
                options.store_interval,
                token.clone(),
            ));
            *repo.flusher.get_mut() = Some((token, handle));
        }

        repo.snapshot = Some(snapshot);
        Ok(repo)
    }

    fn merge(&self, metric: &mut Metric) -> Result<()> {
        let mut metrics = self.metrics.write();
        let kind = metric.kind();
        match metrics
            .iter_mut()
            .find(|stored| stored.kind() == kind && stored.name == metric.name)
        {
            Some(stored) => metric.value = stored.merge(&metric.value)?,
            None => metrics.push(metric.clone()),
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let metrics = self.metrics.read().clone();
        snapshot.save(&metrics).await
    }

    async fn save_after_update(&self) {
        if let Err(e) = self.save().await {
            tracing::error!("Failed to save metrics snapshot: {}", e);
        }
    }
}

impl Default for MemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

async fn flush_loop(
    metrics: Arc<RwLock<Vec<Metric>>>,
    snapshot: Arc<Snapshot>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Consume the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let current = metrics.read().clone();
                if let Err(e) = snapshot.save(&current).await {
                    tracing::error!("Failed to save metrics snapshot: {}", e);
                } else {
                    tracing::debug!("Saved {} metrics to {}", current.len(), snapshot.path.display());
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Repo for MemoryRepo {
    async fn get_all(&self) -> Result<Vec<Metric>> {
        Ok(self.metrics.read().clone())
    }

    async fn get_value(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>> {
        Ok(self
            .metrics
            .read()
            .iter()
            .find(|m| m.kind() == kind && m.name == name)
            .cloned())
    }

    async fn update(&self, metric: &mut Metric) -> Result<()> {
        if !self.sync_save {
            return self.merge(metric);
        }

        let _guard = self.save_lock.lock().await;
        self.merge(metric)?;
        self.save_after_update().await;
        Ok(())
    }

    /// Best effort: metrics before a failing one stay applied.
    async fn update_many(&self, metrics: &[Metric]) -> Result<()> {
        let _guard = if self.sync_save {
            Some(self.save_lock.lock().await)
        } else {
            None
        };

        for metric in metrics {
            let mut metric = metric.clone();
            self.merge(&mut metric)?;
        }

        if self.sync_save {
            self.save_after_update().await;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let flusher = self.flusher.lock().take();
        if let Some((token, handle)) = flusher {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("Snapshot task ended abnormally: {}", e);
            }
        }

        let _guard = self.save_lock.lock().await;
        self.save().await?;
        if let Some(snapshot) = &self.snapshot {
            tracing::info!("Saved metrics to {} on close", snapshot.path.display());
        }
        Ok(())
    }
}
