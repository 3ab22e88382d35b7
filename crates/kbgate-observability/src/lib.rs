//! kbgate Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Health endpoints

pub mod health;
pub mod metrics;

pub use health::{HealthState, ReadinessChecker, ServiceState, ServiceStatus, health_router};
pub use metrics::Metrics;
