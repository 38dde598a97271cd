//! Metric data model.
//!
//! A [`Metric`] is a named, tagged value: a gauge carries the last observed
//! floating point reading, a counter carries an integer delta that storage
//! accumulates. [`MetricRecord`] is the untrusted wire shape (`id`, `type`,
//! `delta`, `value`) accepted from clients; it only becomes a [`Metric`]
//! after [`MetricRecord::validate`] succeeds.

use crate::core::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last-write-wins floating point value
    Gauge,
    /// Additive integer delta
    Counter,
}

impl MetricKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(CollectorError::WrongType),
        }
    }
}

/// Value carried by a metric, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// Untyped input value used when the kind may have to be inferred.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f64),
}

impl FromStr for RawValue {
    type Err = CollectorError;

    /// Integers take precedence so that `"5"` can feed a counter.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(int) = s.parse::<i64>() {
            return Ok(RawValue::Int(int));
        }
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(RawValue::Float)
            .ok_or(CollectorError::WrongValue)
    }
}

/// A validated metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricRecord", into = "MetricRecord")]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    /// Build a metric from an untyped value.
    ///
    /// With no `kind` the kind follows the value: integers become counters,
    /// floats become gauges. With a `kind` the value must fit it; an integer
    /// is widened for a gauge, a float is never narrowed for a counter.
    pub fn new(name: impl Into<String>, kind: Option<MetricKind>, raw: RawValue) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CollectorError::WrongName);
        }

        let value = match (kind, raw) {
            (Some(MetricKind::Counter) | None, RawValue::Int(d)) => MetricValue::Counter(d),
            (Some(MetricKind::Counter), RawValue::Float(_)) => return Err(CollectorError::WrongValue),
            (Some(MetricKind::Gauge), RawValue::Int(v)) => MetricValue::Gauge(v as f64),
            (Some(MetricKind::Gauge) | None, RawValue::Float(v)) => MetricValue::Gauge(v),
        };

        let metric = Self { name, value };
        metric.validate()?;
        Ok(metric)
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Names must be non-empty and gauges finite; JSON has no NaN or infinity.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CollectorError::WrongName);
        }
        match self.value {
            MetricValue::Gauge(v) if !v.is_finite() => Err(CollectorError::WrongValue),
            _ => Ok(()),
        }
    }

    /// Merge an incoming update into this stored entry.
    ///
    /// Counters add, gauges are replaced. Returns the merged value so callers
    /// can echo counter totals back.
    pub(crate) fn merge(&mut self, incoming: &MetricValue) -> Result<MetricValue> {
        match (&mut self.value, incoming) {
            (MetricValue::Counter(total), MetricValue::Counter(delta)) => {
                *total = total
                    .checked_add(*delta)
                    .ok_or_else(|| CollectorError::storage(format!("counter '{}' overflow", self.name)))?;
            },
            (MetricValue::Gauge(current), MetricValue::Gauge(new)) => *current = *new,
            _ => return Err(CollectorError::WrongType),
        }
        Ok(self.value)
    }
}

/// Wire representation of a metric as sent by clients and stored in snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricRecord {
    /// Check name, kind and the kind-specific field, in that order.
    pub fn validate(&self) -> Result<MetricKind> {
        if self.id.is_empty() {
            return Err(CollectorError::WrongName);
        }
        let kind: MetricKind = self.mtype.parse()?;
        let present = match kind {
            MetricKind::Counter => self.delta.is_some(),
            MetricKind::Gauge => self.value.is_some_and(f64::is_finite),
        };
        if !present {
            return Err(CollectorError::WrongValue);
        }
        Ok(kind)
    }
}

impl TryFrom<MetricRecord> for Metric {
    type Error = CollectorError;

    fn try_from(record: MetricRecord) -> Result<Self> {
        let kind = record.validate()?;
        let value = match kind {
            MetricKind::Counter => MetricValue::Counter(record.delta.unwrap_or_default()),
            MetricKind::Gauge => MetricValue::Gauge(record.value.unwrap_or_default()),
        };
        Ok(Metric {
            name: record.id,
            value,
        })
    }
}

impl From<Metric> for MetricRecord {
    fn from(metric: Metric) -> Self {
        let mtype = metric.kind().as_str().to_string();
        let (delta, value) = match metric.value {
            MetricValue::Counter(d) => (Some(d), None),
            MetricValue::Gauge(v) => (None, Some(v)),
        };
        MetricRecord {
            id: metric.name,
            mtype,
            delta,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, mtype: &str, delta: Option<i64>, value: Option<f64>) -> MetricRecord {
        MetricRecord {
            id: id.to_string(),
            mtype: mtype.to_string(),
            delta,
            value,
        }
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let err = record("", "counter", Some(1), None).validate().unwrap_err();
        assert!(matches!(err, CollectorError::WrongName));
    }

    #[test]
    fn test_validate_rejects_unknown_kind() {
        let err = record("Alloc", "histogram", None, Some(1.0)).validate().unwrap_err();
        assert!(matches!(err, CollectorError::WrongType));
    }

    #[test]
    fn test_validate_rejects_missing_field() {
        let err = record("PollCount", "counter", None, Some(1.0)).validate().unwrap_err();
        assert!(matches!(err, CollectorError::WrongValue));

        let err = record("Alloc", "gauge", Some(1), None).validate().unwrap_err();
        assert!(matches!(err, CollectorError::WrongValue));
    }

    #[test]
    fn test_new_infers_kind() {
        let counter = Metric::new("PollCount", None, RawValue::Int(3)).unwrap();
        assert_eq!(counter.value, MetricValue::Counter(3));

        let gauge = Metric::new("Alloc", None, RawValue::Float(1.5)).unwrap();
        assert_eq!(gauge.value, MetricValue::Gauge(1.5));
    }

    #[test]
    fn test_new_checks_supplied_kind() {
        let widened = Metric::new("Alloc", Some(MetricKind::Gauge), RawValue::Int(7)).unwrap();
        assert_eq!(widened.value, MetricValue::Gauge(7.0));

        let err = Metric::new("PollCount", Some(MetricKind::Counter), RawValue::Float(0.5)).unwrap_err();
        assert!(matches!(err, CollectorError::WrongValue));

        let err = Metric::new("", None, RawValue::Int(1)).unwrap_err();
        assert!(matches!(err, CollectorError::WrongName));
    }

    #[test]
    fn test_raw_value_prefers_integers() {
        assert_eq!("42".parse::<RawValue>().unwrap(), RawValue::Int(42));
        assert_eq!("4.2".parse::<RawValue>().unwrap(), RawValue::Float(4.2));
        assert!("none".parse::<RawValue>().is_err());
    }

    #[test]
    fn test_non_finite_gauges_are_rejected() {
        for text in ["NaN", "inf", "-inf", "infinity"] {
            assert!(matches!(text.parse::<RawValue>(), Err(CollectorError::WrongValue)));
        }

        let err = Metric::new("Alloc", Some(MetricKind::Gauge), RawValue::Float(f64::NAN)).unwrap_err();
        assert!(matches!(err, CollectorError::WrongValue));

        let err = Metric::gauge("Alloc", f64::INFINITY).validate().unwrap_err();
        assert!(matches!(err, CollectorError::WrongValue));
        assert!(Metric::gauge("Alloc", f64::MAX).validate().is_ok());

        let err = record("Alloc", "gauge", None, Some(f64::NEG_INFINITY)).validate().unwrap_err();
        assert!(matches!(err, CollectorError::WrongValue));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(Metric::counter("PollCount", 5)).unwrap();
        assert_eq!(json, serde_json::json!({"id": "PollCount", "type": "counter", "delta": 5}));

        let parsed: Metric =
            serde_json::from_str(r#"{"id":"Alloc","type":"gauge","value":12.5}"#).unwrap();
        assert_eq!(parsed, Metric::gauge("Alloc", 12.5));

        assert!(serde_json::from_str::<Metric>(r#"{"id":"Alloc","type":"gauge"}"#).is_err());
    }

    #[test]
    fn test_merge_semantics() {
        let mut stored = Metric::counter("hits", 5);
        assert_eq!(stored.merge(&MetricValue::Counter(3)).unwrap(), MetricValue::Counter(8));

        let mut gauge = Metric::gauge("Alloc", 1.0);
        assert_eq!(gauge.merge(&MetricValue::Gauge(2.0)).unwrap(), MetricValue::Gauge(2.0));

        let mut overflowing = Metric::counter("hits", i64::MAX);
        assert!(overflowing.merge(&MetricValue::Counter(1)).is_err());
    }
}
