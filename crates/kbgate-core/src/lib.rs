//! kbgate Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout kbgate:
//! - Tenant identity and trusted tenant resolution
//! - Tenant-scoped retrieval requests and the `Retriever` trait
//! - Conversation memory, model provider and transcript store abstractions
//! - Core error types

pub mod error;
pub mod memory;
pub mod model;
pub mod retrieval;
pub mod session_store;
pub mod tenant;

/// Header the runtime sets to the caller's session identifier.
pub const RUNTIME_SESSION_HEADER: &str = "x-amzn-bedrock-agentcore-runtime-session-id";

pub use error::{Error, Result};
pub use tenant::{TenantContext, TenantId, TenantResolver, TenantSource};
