//! Supervision library for Vowpal Wabbit prediction daemons
//!
//! This crate provides the core functionality for:
//! - Running daemon processes and probing their worker counts
//! - Daemon lifecycle management (start, stop, liveness checks)
//! - Pooled TCP client for the line-based prediction protocol
//! - Hot-swapping the daemon when its model file changes
//! - Periodic model dumps
//! - Health checks and observability

pub mod client;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod runner;
pub mod service;
pub mod supervisor;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use error::{Result, VwError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DaemonMetrics, StructuredLogger};
pub use service::{Backend, DaemonService, PredictionBackend, ServiceConfig};
