//! Retry utilities for transient errors.
//!
//! Every retrying component (file snapshots, the relational repo and both
//! agent transports) shares one policy: an ordered list of waits, a
//! classifier deciding which errors are transient, and the operation itself.

use crate::core::{CollectorError, Result};
use humantime_serde::Serde;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;

/// Ordered list of waits between attempts.
///
/// The first attempt always runs immediately, so `n` configured intervals
/// allow at most `n + 1` attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    intervals: Vec<Duration>,
}

impl Backoff {
    /// Create a backoff schedule from the configured intervals.
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self { intervals }
    }

    /// A schedule that never retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Configured retry intervals, without the leading immediate attempt.
    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }

    /// Maximum number of attempts this schedule allows.
    pub fn max_attempts(&self) -> usize {
        self.intervals.len() + 1
    }

    /// Waits before each attempt, starting with zero.
    pub fn waits(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::once(Duration::ZERO).chain(self.intervals.iter().copied())
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

/// Parses a comma separated list such as `1,3,5` or `500ms, 2s`.
///
/// Bare integers are seconds.
impl FromStr for Backoff {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        let intervals = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(parse_interval)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(intervals))
    }
}

fn parse_interval(part: &str) -> Result<Duration> {
    if let Ok(secs) = part.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let de: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        part.into_deserializer();
    Serde::<Duration>::deserialize(de)
        .map(Serde::into_inner)
        .map_err(|e| CollectorError::config(format!("invalid retry interval '{part}': {e}")))
}

impl Serialize for Backoff {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let intervals: Vec<Serde<Duration>> =
            self.intervals.iter().copied().map(Serde::from).collect();
        intervals.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Backoff {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(Vec<Serde<Duration>>),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::List(list) => Ok(Self::new(list.into_iter().map(Serde::into_inner).collect())),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the schedule is exhausted.
///
/// The last error is returned when every attempt failed. Waiting is a plain
/// sleep, so dropping the returned future (timeout, `select!` on a
/// cancellation token) abandons the retry loop at once.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    backoff: &Backoff,
    is_transient: C,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut waits = backoff.waits().peekable();
    let mut attempt = 0usize;

    loop {
        let wait = waits.next().unwrap_or(Duration::ZERO);
        if !wait.is_zero() {
            sleep(wait).await;
        }
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !is_transient(&error) || waits.peek().is_none() {
                    return Err(error);
                }

                tracing::warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    error,
                    waits.peek().copied().unwrap_or_default()
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(n: usize) -> Backoff {
        Backoff::new(vec![Duration::from_millis(1); n])
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: std::result::Result<u32, CollectorError> = retry_with_backoff(
            &fast(3),
            |_| true,
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if count < 3 {
                        Err(CollectorError::network("temporary failure"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_transient_stops_immediately() {
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), CollectorError> = retry_with_backoff(
            &fast(5),
            |_| false,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(CollectorError::config("permanent failure")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_exhausted_schedule_returns_last_error() {
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), CollectorError> = retry_with_backoff(
            &fast(2),
            |_| true,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(CollectorError::network("still down")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_waits_start_immediately() {
        let backoff = Backoff::default();
        let waits: Vec<_> = backoff.waits().collect();
        assert_eq!(
            waits,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5)
            ]
        );
        assert_eq!(backoff.max_attempts(), 4);
        assert_eq!(Backoff::none().max_attempts(), 1);
    }

    #[test]
    fn test_backoff_from_str() {
        let backoff: Backoff = "1,3,5".parse().unwrap();
        assert_eq!(backoff, Backoff::default());

        let backoff: Backoff = "250ms, 2s".parse().unwrap();
        assert_eq!(
            backoff.intervals(),
            &[Duration::from_millis(250), Duration::from_secs(2)]
        );

        assert_eq!("".parse::<Backoff>().unwrap(), Backoff::none());
        assert!("soon".parse::<Backoff>().is_err());
    }

    #[test]
    fn test_backoff_from_yaml() {
        let backoff: Backoff = serde_yaml::from_str("[1s, 500ms]").unwrap();
        assert_eq!(
            backoff.intervals(),
            &[Duration::from_secs(1), Duration::from_millis(500)]
        );
    }
}
