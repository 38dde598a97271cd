//! Core domain types for the metrics pipeline.
//!
//! This module contains the metric data model, the error type and the
//! configuration, retry and crypto building blocks shared by the agent and
//! the collector.

pub mod config;
pub mod crypto;
pub mod error;
pub mod metric;
pub mod retry;

// Re-export commonly used types
pub use config::{
    AgentConfig, AgentConfigBuilder, SecurityConfig, ServerConfig, ServerConfigBuilder,
    StorageConfig, TransportKind,
};
pub use error::{CollectorError, Result};
pub use metric::{Metric, MetricKind, MetricRecord, MetricValue, RawValue};
pub use retry::{retry_with_backoff, Backoff};
