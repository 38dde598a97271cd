//! PostgreSQL repo tests. They run only when `DATABASE_DSN` is set.

use metrix_lib::core::{Backoff, CollectorError, Metric, MetricKind, MetricValue};
use metrix_lib::storage::{PostgresRepo, Repo};
use std::path::Path;
use std::time::Duration;

async fn connect() -> Option<PostgresRepo> {
    connect_with(Backoff::none()).await
}

async fn connect_with(retries: Backoff) -> Option<PostgresRepo> {
    let dsn = std::env::var("DATABASE_DSN").ok().filter(|d| !d.is_empty())?;
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    Some(
        PostgresRepo::connect(&dsn, &migrations, retries)
            .await
            .unwrap(),
    )
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_counter_upsert_accumulates() {
    let Some(repo) = connect().await else {
        return;
    };
    let name = unique("hits");

    let mut first = Metric::counter(name.clone(), 5);
    repo.update(&mut first).await.unwrap();
    let mut second = Metric::counter(name.clone(), 3);
    repo.update(&mut second).await.unwrap();
    assert_eq!(second.value, MetricValue::Counter(8));

    repo.update_many(&[Metric::counter(name.clone(), 2), Metric::gauge(name.clone(), 0.5)])
        .await
        .unwrap();

    let counter = repo.get_value(MetricKind::Counter, &name).await.unwrap().unwrap();
    assert_eq!(counter.value, MetricValue::Counter(10));
    let gauge = repo.get_value(MetricKind::Gauge, &name).await.unwrap().unwrap();
    assert_eq!(gauge.value, MetricValue::Gauge(0.5));
    repo.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_row_is_none() {
    let Some(repo) = connect().await else {
        return;
    };
    assert!(repo
        .get_value(MetricKind::Gauge, &unique("absent"))
        .await
        .unwrap()
        .is_none());
    repo.ping().await.unwrap();
    repo.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_batch_rolls_back_without_retry() {
    // A retry would wait far longer than the timeout below.
    let Some(repo) = connect_with(Backoff::new(vec![Duration::from_secs(60)])).await else {
        return;
    };
    let counter = unique("saturated");
    let fresh = unique("fresh");

    let mut seed = Metric::counter(counter.clone(), i64::MAX);
    repo.update(&mut seed).await.unwrap();

    let batch = [Metric::gauge(fresh.clone(), 1.0), Metric::counter(counter.clone(), 1)];
    let err = tokio::time::timeout(Duration::from_secs(10), repo.update_many(&batch))
        .await
        .unwrap()
        .unwrap_err();
    match &err {
        CollectorError::Database(sqlx::Error::Database(db)) => {
            assert_eq!(db.code().as_deref(), Some("22003"));
        },
        other => panic!("unexpected error: {other}"),
    }

    assert!(repo.get_value(MetricKind::Gauge, &fresh).await.unwrap().is_none());
    let stored = repo.get_value(MetricKind::Counter, &counter).await.unwrap().unwrap();
    assert_eq!(stored.value, MetricValue::Counter(i64::MAX));
    repo.close().await.unwrap();
}
