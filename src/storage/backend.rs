//! Repo trait shared by the storage backends.

use crate::core::{Metric, MetricKind, Result};

/// Trait for repository implementations owning the metric collection.
///
/// Entries are keyed by `(name, kind)`. Counters accumulate, gauges are
/// replaced.
#[async_trait::async_trait]
pub trait Repo: Send + Sync {
    /// Independent copy of every stored metric.
    async fn get_all(&self) -> Result<Vec<Metric>>;

    /// Look up one metric. `None` when absent.
    async fn get_value(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>>;

    /// Merge one metric.
    ///
    /// For counters the delta of `metric` is replaced by the accumulated
    /// total after the merge.
    async fn update(&self, metric: &mut Metric) -> Result<()>;

    /// Merge a set of metrics.
    async fn update_many(&self, metrics: &[Metric]) -> Result<()>;

    /// Check that the repository is reachable.
    async fn ping(&self) -> Result<()>;

    /// Flush and release resources.
    async fn close(&self) -> Result<()>;
}
