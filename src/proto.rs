//! Binary wire messages for the `collector.Storage` gRPC service.
//!
//! The service stubs (`storage_server`, `storage_client`) are generated by
//! `build.rs` from these message types.

use crate::core::{CollectorError, Metric, MetricKind, MetricValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Counter = 0,
    Gauge = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricDescr {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "MetricType", tag = "2")]
    pub r#type: i32,
    #[prost(int64, tag = "3")]
    pub delta: i64,
    #[prost(double, tag = "4")]
    pub value: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateRequest {
    #[prost(message, optional, tag = "1")]
    pub metric: ::core::option::Option<MetricDescr>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateManyRequest {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<MetricDescr>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricRequest {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(enumeration = "MetricType", tag = "2")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricResponse {
    #[prost(message, optional, tag = "1")]
    pub metric: ::core::option::Option<MetricDescr>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllMetricsResponse {
    #[prost(message, repeated, tag = "1")]
    pub metrics: ::prost::alloc::vec::Vec<MetricDescr>,
}

include!(concat!(env!("OUT_DIR"), "/collector.Storage.rs"));

impl From<MetricKind> for MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricType::Counter,
            MetricKind::Gauge => MetricType::Gauge,
        }
    }
}

impl From<MetricType> for MetricKind {
    fn from(kind: MetricType) -> Self {
        match kind {
            MetricType::Counter => MetricKind::Counter,
            MetricType::Gauge => MetricKind::Gauge,
        }
    }
}

/// Decode the wire enum, rejecting unknown values.
pub fn decode_kind(raw: i32) -> Result<MetricKind, CollectorError> {
    MetricType::try_from(raw)
        .map(MetricKind::from)
        .map_err(|_| CollectorError::WrongType)
}

impl From<&Metric> for MetricDescr {
    fn from(metric: &Metric) -> Self {
        let mut descr = MetricDescr {
            id: metric.name.clone(),
            ..Default::default()
        };
        descr.set_type(metric.kind().into());
        match metric.value {
            MetricValue::Counter(delta) => descr.delta = delta,
            MetricValue::Gauge(value) => descr.value = value,
        }
        descr
    }
}

impl TryFrom<MetricDescr> for Metric {
    type Error = CollectorError;

    fn try_from(descr: MetricDescr) -> Result<Self, CollectorError> {
        if descr.id.is_empty() {
            return Err(CollectorError::WrongName);
        }
        let value = match decode_kind(descr.r#type)? {
            MetricKind::Counter => MetricValue::Counter(descr.delta),
            MetricKind::Gauge => MetricValue::Gauge(descr.value),
        };
        let metric = Metric {
            name: descr.id,
            value,
        };
        metric.validate()?;
        Ok(metric)
    }
}
