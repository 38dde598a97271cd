//! PostgreSQL repo.
//!
//! Counters and gauges share one `metrics` table keyed by `(mname, mtype)`.
//! Merging is done by the database with an upsert, so concurrent updates of
//! the same counter are serialized by row locks.

use super::Repo;
use crate::core::{
    retry_with_backoff, Backoff, CollectorError, Metric, MetricKind, MetricValue, Result,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Connection;
use std::path::Path;
use std::time::Duration;

const SELECT_ALL: &str = "SELECT mname, mtype, delta, value FROM metrics";

const SELECT_ONE: &str =
    "SELECT mname, mtype, delta, value FROM metrics WHERE mname = $1 AND mtype = $2";

const UPSERT: &str = "INSERT INTO metrics (mname, mtype, delta, value) VALUES ($1, $2, $3, $4) \
     ON CONFLICT (mname, mtype) DO UPDATE SET delta = metrics.delta + $3, value = $4 \
     RETURNING delta";

type MetricRow = (String, String, Option<i64>, Option<f64>);

/// Metric repository backed by PostgreSQL.
pub struct PostgresRepo {
    pool: PgPool,
    retries: Backoff,
}

impl PostgresRepo {
    /// Connect, wait for the database to answer and apply migrations from
    /// `migrations_dir`.
    pub async fn connect(dsn: &str, migrations_dir: &Path, retries: Backoff) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(dsn)?;

        let repo = Self { pool, retries };
        repo.ping().await?;
        repo.migrate(migrations_dir).await?;
        Ok(repo)
    }

    async fn migrate(&self, migrations_dir: &Path) -> Result<()> {
        let migrator = sqlx::migrate::Migrator::new(migrations_dir).await?;
        migrator.run(&self.pool).await?;
        tracing::info!("Database migrations applied from {}", migrations_dir.display());
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        retry_with_backoff(&self.retries, is_transient, op).await
    }

    async fn upsert(&self, metric: &Metric) -> Result<Option<i64>> {
        let (delta, value) = columns(metric);
        let mut tx = self.pool.begin().await?;
        let total: Option<i64> = sqlx::query_scalar(UPSERT)
            .bind(&metric.name)
            .bind(metric.kind().as_str())
            .bind(delta)
            .bind(value)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(total)
    }

    async fn upsert_all(&self, metrics: &[Metric]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for metric in metrics {
            let (delta, value) = columns(metric);
            sqlx::query(UPSERT)
                .bind(&metric.name)
                .bind(metric.kind().as_str())
                .bind(delta)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn columns(metric: &Metric) -> (Option<i64>, Option<f64>) {
    match metric.value {
        MetricValue::Counter(delta) => (Some(delta), None),
        MetricValue::Gauge(value) => (None, Some(value)),
    }
}

fn decode((name, mtype, delta, value): MetricRow) -> Result<Metric> {
    let kind: MetricKind = mtype
        .parse()
        .map_err(|_| CollectorError::storage(format!("unknown metric type '{mtype}' in table")))?;
    match (kind, delta, value) {
        (MetricKind::Counter, Some(delta), _) => Ok(Metric::counter(name, delta)),
        (MetricKind::Gauge, _, Some(value)) => Ok(Metric::gauge(name, value)),
        _ => Err(CollectorError::storage(format!("metric '{name}' has no {kind} column"))),
    }
}

/// Connection exceptions (SQLSTATE class 08) and transport failures.
fn is_transient(err: &CollectorError) -> bool {
    match err {
        CollectorError::Database(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut) => true,
        CollectorError::Database(sqlx::Error::Database(db)) => {
            db.code().is_some_and(|code| code.starts_with("08"))
        },
        _ => false,
    }
}

#[async_trait::async_trait]
impl Repo for PostgresRepo {
    async fn get_all(&self) -> Result<Vec<Metric>> {
        let rows: Vec<MetricRow> = self
            .with_retry(move || async move {
                Ok::<_, CollectorError>(sqlx::query_as(SELECT_ALL).fetch_all(&self.pool).await?)
            })
            .await?;
        rows.into_iter().map(decode).collect()
    }

    async fn get_value(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>> {
        let row: Option<MetricRow> = self
            .with_retry(move || async move {
                Ok::<_, CollectorError>(sqlx::query_as(SELECT_ONE)
                    .bind(name)
                    .bind(kind.as_str())
                    .fetch_optional(&self.pool)
                    .await?)
            })
            .await?;
        row.map(decode).transpose()
    }

    async fn update(&self, metric: &mut Metric) -> Result<()> {
        let total = {
            let snapshot: &Metric = metric;
            self.with_retry(|| self.upsert(snapshot)).await?
        };

        if let (MetricValue::Counter(delta), Some(total)) = (&mut metric.value, total) {
            *delta = total;
        }
        Ok(())
    }

    /// All or nothing: one transaction for the whole set.
    async fn update_many(&self, metrics: &[Metric]) -> Result<()> {
        self.with_retry(|| self.upsert_all(metrics)).await
    }

    async fn ping(&self) -> Result<()> {
        self.with_retry(move || async move {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok::<_, CollectorError>(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
