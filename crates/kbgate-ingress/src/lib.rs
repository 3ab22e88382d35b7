//! kbgate Ingress
//!
//! This crate provides the HTTP surface of the agent runtime:
//! - `POST /invocations` - run the agent for the caller's tenant
//! - `POST /retrieve` - tenant-scoped knowledge base search
//! - `GET /ping` - runtime health, busy while invocations are in flight
//!
//! The tenant is always resolved from trusted request headers before the body
//! is looked at. A request without a resolvable tenant is rejected and never
//! reaches the agent or the knowledge base.

pub mod middleware;
pub mod runtime;
pub mod types;

pub use runtime::{PingResponse, PingState, PingStatus, RuntimeState, router};
pub use types::{IngressError, IngressResult, RequestId, RequestMetadata};
