//! Health/Status Endpoint Module
//!
//! HTTP surface for liveness, readiness, and metrics queries. Reads the
//! metrics sink only; exposes no mutation back into the relay.

pub mod handlers;
pub mod server;
pub mod types;

pub use server::HealthServer;
pub use types::{HealthDetail, LiveResponse, ReadyResponse, ServiceInfo};
