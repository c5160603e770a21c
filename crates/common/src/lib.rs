//! Shared configuration, error types, IDs, and observability primitives for spool crates.
//!
//! Architecture role:
//! - defines pipeline configuration passed from callers to executors
//! - provides common [`SpoolError`] / [`Result`] contracts
//! - hosts the prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{DEFAULT_WORKER_THREAD_NAME, PipelineConfig};
pub use error::{Result, SpoolError};
pub use ids::*;
pub use metrics::{MetricsRegistry, global_metrics};
