//! Shared HTTP client utilities

use crate::{EgressError, Result};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Maximum number of idle connections per host
    pub pool_max_idle_per_host: usize,

    /// Maximum number of retries for transient errors
    pub max_retries: u32,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            // Model turns with tool use can take a couple of minutes end to end
            timeout_secs: 300,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 16,
            max_retries: 3,
            user_agent: format!("kbgate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Tighter defaults for the retrieval and memory services
    pub fn for_lookup_service() -> Self {
        Self {
            timeout_secs: 30,
            ..Self::default()
        }
    }
}

/// Create a configured HTTP client with connection pooling
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Expire idle connections before the services close them on their side
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| EgressError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Attach `Authorization: Bearer` when a service token is configured
pub(crate) fn with_service_token(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) if !token.is_empty() => builder.bearer_auth(token),
        _ => builder,
    }
}

/// Transport failures and gateway-style 5xx responses. A 429 carries its own
/// retry-after and goes straight back to the caller.
fn is_transient(error: &EgressError) -> bool {
    match error {
        EgressError::HttpError(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        EgressError::ProviderError { status_code, .. } => {
            matches!(status_code, 500 | 502 | 503 | 504)
        }
        EgressError::Timeout(_) => true,
        _ => false,
    }
}

/// Delay before retry number `retry` (1-based): 100ms, 200ms, 400ms, ...
fn backoff(retry: u32) -> Duration {
    Duration::from_millis(100 << (retry - 1).min(6))
}

/// Run `operation`, retrying transient failures up to `max_retries` times.
pub async fn with_retry<F, Fut, T>(max_retries: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retry < max_retries && is_transient(&e) => {
                retry += 1;
                let delay = backoff(retry);
                warn!(
                    error = %e,
                    retry,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Transient downstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if retry > 0 {
                    debug!(retries = retry, "Giving up after retries");
                }
                return Err(e);
            }
        }
    }
}
