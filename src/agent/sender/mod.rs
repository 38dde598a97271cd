//! Batch delivery to the collector.
//!
//! A snapshot is split into fixed-size batches that flow through a bounded
//! channel to a fixed pool of workers; the pool size is the rate limit. Each
//! worker retries a batch only while the collector refuses connections and
//! gives up on any other error after logging it. A worker that finds its
//! transport client unavailable fails the whole send.

use crate::core::{retry_with_backoff, AgentConfig, Backoff, CollectorError, Metric, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod grpc;
pub mod http;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

/// Delivers one batch of metrics to the collector.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &[Metric]) -> Result<()>;
}

type Batches = Arc<Mutex<mpsc::Receiver<Vec<Metric>>>>;

/// Rate-limited batch sender.
#[derive(Clone)]
pub struct Sender {
    transport: Arc<dyn Transport>,
    rate_limit: usize,
    batch_size: usize,
    timeout: Duration,
    retries: Backoff,
}

impl Sender {
    pub fn new(transport: Arc<dyn Transport>, config: &AgentConfig) -> Self {
        Self {
            transport,
            rate_limit: config.rate_limit.max(1),
            batch_size: config.batch_size.max(1),
            timeout: config.timeout,
            retries: config.retries.clone(),
        }
    }

    /// Deliver `metrics` and wait for every worker to finish.
    ///
    /// Delivery failures are logged per batch. Only a fatal worker error is
    /// returned, after the remaining workers have been cancelled.
    pub async fn send(&self, metrics: Vec<Metric>, token: &CancellationToken) -> Result<()> {
        let group = token.child_token();
        let (tx, rx) = mpsc::channel(self.rate_limit);
        let batches: Batches = Arc::new(Mutex::new(rx));

        let mut tasks = JoinSet::new();
        tasks.spawn(produce(metrics, self.batch_size, tx, group.clone()));
        for id in 1..=self.rate_limit {
            tasks.spawn(work(id, self.clone(), Arc::clone(&batches), group.clone()));
        }

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined.map_err(CollectorError::from).and_then(|r| r) {
                group.cancel();
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    /// One batch, retried while the collector refuses connections.
    async fn deliver(&self, batch: &[Metric]) -> Result<()> {
        let transport = &self.transport;
        let timeout = self.timeout;
        retry_with_backoff(
            &self.retries,
            CollectorError::is_connection_refused,
            move || async move {
                tokio::time::timeout(timeout, transport.send(batch))
                    .await
                    .map_err(|_| CollectorError::timeout(timeout))?
            },
        )
        .await
    }
}

async fn produce(
    metrics: Vec<Metric>,
    batch_size: usize,
    tx: mpsc::Sender<Vec<Metric>>,
    token: CancellationToken,
) -> Result<()> {
    for chunk in metrics.chunks(batch_size) {
        tokio::select! {
            _ = token.cancelled() => break,
            sent = tx.send(chunk.to_vec()) => if sent.is_err() { break },
        }
    }
    Ok(())
}

async fn work(id: usize, sender: Sender, batches: Batches, token: CancellationToken) -> Result<()> {
    loop {
        let next = {
            let mut rx = batches.lock().await;
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                batch = rx.recv() => batch,
            }
        };
        let Some(batch) = next else {
            return Ok(());
        };

        let result = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = sender.deliver(&batch) => result,
        };

        match result {
            Ok(()) => tracing::debug!("[worker {}] metrics sent: {}", id, batch.len()),
            Err(e @ CollectorError::ClientUnavailable(_)) => return Err(e),
            Err(e) => tracing::error!("[worker {}] error sending metric values: {}", id, e),
        }
    }
}
