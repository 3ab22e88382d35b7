//! Error types for kbgate Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Multi-tenancy errors
    #[error("Tenant required: {0}")]
    TenantRequired(String),

    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    // Downstream service errors
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Memory service error: {0}")]
    Memory(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Rate limit exceeded{}", retry_after_secs.map(|s| format!(": retry after {}s", s)).unwrap_or_default())]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    // Session store errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
