//! # Utility Modules
//!
//! Supporting utilities for logging and observability.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by [`crate::config::LoggingConfig`]
//! - **Metrics**: Thread-safe counters for connections, frames and failures

pub mod logging;
pub mod metrics;

pub use metrics::{global_metrics, MetricsSnapshot};
