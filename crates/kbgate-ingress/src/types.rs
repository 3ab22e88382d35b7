//! Shared ingress types and utilities

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kbgate_core::{Error, RUNTIME_SESSION_HEADER};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request ID for tracing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new request ID
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().timestamp_micros();

        Self(format!("req_{:x}_{:x}", timestamp, count))
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Get the string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ingress error types
#[derive(Debug, Error)]
pub enum IngressError {
    /// Malformed or empty payload
    #[error("{0}")]
    InvalidRequest(String),

    /// Request body over the configured limit
    #[error("Request too large: {0} bytes")]
    RequestTooLarge(usize),

    /// Error raised while serving the request
    #[error(transparent)]
    Core(#[from] Error),
}

impl IngressError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            IngressError::RequestTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            IngressError::Core(err) => match err {
                Error::InvalidRequest(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
                Error::TenantRequired(_) => StatusCode::UNAUTHORIZED,
                Error::InvalidTenant(_) => StatusCode::FORBIDDEN,
                Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
                Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                Error::Retrieval(_) | Error::Memory(_) | Error::Model(_) => {
                    StatusCode::BAD_GATEWAY
                }
                Error::SessionStore(_) | Error::Config(_) | Error::Internal(_) | Error::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Message placed in the `error` field of the response body
    pub fn message(&self) -> String {
        match self {
            IngressError::Core(Error::InvalidRequest(msg)) => msg.clone(),
            other => other.to_string(),
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            IngressError::Core(Error::RateLimitExceeded { retry_after_secs }) => *retry_after_secs,
            _ => None,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.message() });

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Ingress result type
pub type IngressResult<T> = Result<T, IngressError>;

/// Request metadata collected during ingress
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// Request ID
    pub request_id: RequestId,
    /// Session identifier assigned by the runtime
    pub runtime_session_id: Option<String>,
    /// Client IP address
    pub client_ip: Option<String>,
    /// User agent
    pub user_agent: Option<String>,
}

impl RequestMetadata {
    /// Create new request metadata
    pub fn new() -> Self {
        Self {
            request_id: RequestId::generate(),
            runtime_session_id: None,
            client_ip: None,
            user_agent: None,
        }
    }

    /// Collect metadata from request headers.
    ///
    /// An inbound `x-request-id` is kept so logs line up with the caller's.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut metadata = Self::new();

        if let Some(id) = header_str(headers, "x-request-id") {
            metadata.request_id = RequestId::from_string(id.to_string());
        }

        if let Some(session_id) = header_str(headers, RUNTIME_SESSION_HEADER) {
            metadata = metadata.with_runtime_session_id(session_id.to_string());
        }

        // Take the first IP in the list
        if let Some(forwarded_for) = header_str(headers, "x-forwarded-for") {
            let client_ip = forwarded_for
                .split(',')
                .next()
                .unwrap_or(forwarded_for)
                .trim();
            metadata = metadata.with_client_ip(client_ip.to_string());
        } else if let Some(real_ip) = header_str(headers, "x-real-ip") {
            metadata = metadata.with_client_ip(real_ip.to_string());
        }

        if let Some(user_agent) = header_str(headers, header::USER_AGENT.as_str()) {
            metadata = metadata.with_user_agent(user_agent.to_string());
        }

        metadata
    }

    /// Set the runtime session ID
    pub fn with_runtime_session_id(mut self, session_id: String) -> Self {
        self.runtime_session_id = Some(session_id);
        self
    }

    /// Set client IP
    pub fn with_client_ip(mut self, ip: String) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Set user agent
    pub fn with_user_agent(mut self, ua: String) -> Self {
        self.user_agent = Some(ua);
        self
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blank UTF-8 header value
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
