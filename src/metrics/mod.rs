//! Metrics Module
//!
//! Handles connection/byte accounting and export.

pub mod collector;
pub mod reporter;
pub mod types;

pub use collector::Metrics;
pub use reporter::MetricsReporter;
pub use types::{MetricsSnapshot, Throughput};
