//! kbgate Egress Connectors
//!
//! This crate provides connectors to the downstream managed services:
//! - Knowledge base retrieval connector
//! - Conversation memory connector
//! - Anthropic Messages connector (the agent's model)

pub mod anthropic;
pub mod client;
pub mod knowledge_base;
pub mod memory;
pub mod retry_after;

pub use retry_after::parse_retry_after;

use thiserror::Error;

/// Egress error types
#[derive(Debug, Error)]
pub enum EgressError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Non-success status from the downstream service
    #[error("Provider error ({status_code}): {message}")]
    ProviderError { status_code: u16, message: String },

    /// Downstream throttling
    #[error("Rate limit exceeded{}", retry_after_secs.map(|s| format!(": retry after {}s", s)).unwrap_or_default())]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    /// Response body could not be parsed
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timeout after {0}s")]
    Timeout(u64),

    /// Connector misconfiguration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, EgressError>;

/// Which downstream service an error came from, so it maps onto the right
/// core error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    KnowledgeBase,
    Memory,
    Model,
}

impl EgressError {
    /// Convert into a core error attributed to `service`
    pub fn into_core(self, service: Service) -> kbgate_core::Error {
        use kbgate_core::Error;

        match self {
            EgressError::RateLimitExceeded { retry_after_secs } => {
                Error::RateLimitExceeded { retry_after_secs }
            }
            EgressError::ConfigError(msg) => Error::Config(msg),
            other => {
                let msg = other.to_string();
                match service {
                    Service::KnowledgeBase => Error::Retrieval(msg),
                    Service::Memory => Error::Memory(msg),
                    Service::Model => Error::Model(msg),
                }
            }
        }
    }
}

/// Read an error response into an `EgressError`, honouring `retry-after` on 429
pub(crate) async fn error_from_response(response: reqwest::Response) -> EgressError {
    let status_code = response.status().as_u16();

    if status_code == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return EgressError::RateLimitExceeded { retry_after_secs };
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error body".to_string());

    EgressError::ProviderError {
        status_code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_core_by_service() {
        let err = EgressError::ProviderError {
            status_code: 503,
            message: "unavailable".to_string(),
        };
        assert!(matches!(
            err.into_core(Service::KnowledgeBase),
            kbgate_core::Error::Retrieval(_)
        ));

        let err = EgressError::ParseError("bad json".to_string());
        assert!(matches!(
            err.into_core(Service::Memory),
            kbgate_core::Error::Memory(_)
        ));

        let err = EgressError::Timeout(5);
        assert!(matches!(
            err.into_core(Service::Model),
            kbgate_core::Error::Model(_)
        ));
    }

    #[test]
    fn test_rate_limit_preserved() {
        let err = EgressError::RateLimitExceeded {
            retry_after_secs: Some(12),
        };
        match err.into_core(Service::KnowledgeBase) {
            kbgate_core::Error::RateLimitExceeded { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(12))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
