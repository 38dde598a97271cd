//! Metrix - metrics agent and collector.
//!
//! An agent periodically samples process and host statistics and pushes them
//! in batches to a collector, which validates, merges and persists them.
//!
//! # Architecture
//!
//! - `core`: metric data model, errors, configuration, retry policy, crypto
//! - `storage`: the [`storage::Repo`] trait, in-memory and PostgreSQL repos,
//!   and the validating [`storage::MetricsStorage`] facade
//! - `agent`: scanner, rate-limited sender and the agent orchestrator
//! - `server`: HTTP and gRPC transports with their middleware
//! - `proto`: gRPC wire messages and generated service stubs
//! - `cli`: command-line parsing and logging setup for the binaries
//!
//! # Example
//!
//! ```no_run
//! use metrix_lib::core::ServerConfig;
//! use metrix_lib::server::Server;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(&ServerConfig::default()).await?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod agent;
pub mod cli;
pub mod core;
pub mod proto;
pub mod server;
pub mod storage;

// Re-export core types for convenience
pub use crate::core::{CollectorError, Metric, Result};
