//! Tenant-scoped retrieval types
//!
//! Callers describe *what* to search for with a [`RetrievalQuery`]. The only
//! way to turn that into something a [`Retriever`] accepts is
//! [`RetrievalRequest::tenant_scoped`], which always attaches an equality
//! filter on the tenant partition key taken from a [`TenantContext`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{tenant::TenantContext, Error, Result};

/// Metadata key the knowledge base partitions documents by.
pub const DEFAULT_TENANT_FILTER_KEY: &str = "tenant_id";

/// Upper bound the retrieval service accepts for `numberOfResults`.
pub const SERVICE_MAX_RESULTS: u32 = 100;

/// A query as supplied by a user or by the model. Carries no tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            max_results: None,
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }
}

/// Result count limits applied when scoping a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalLimits {
    /// Used when the query does not ask for a specific count
    pub default_results: u32,
    /// Requests above this are clamped down to it
    pub max_results: u32,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self {
            default_results: 5,
            max_results: SERVICE_MAX_RESULTS,
        }
    }
}

impl RetrievalLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_results == 0 || self.max_results > SERVICE_MAX_RESULTS {
            return Err(Error::Config(format!(
                "max_results must be between 1 and {}",
                SERVICE_MAX_RESULTS
            )));
        }
        if self.default_results == 0 || self.default_results > self.max_results {
            return Err(Error::Config(format!(
                "default_results must be between 1 and max_results ({})",
                self.max_results
            )));
        }
        Ok(())
    }
}

/// Metadata filter understood by the retrieval service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataFilter {
    Equals { key: String, value: String },
}

/// A fully scoped request ready to be forwarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalRequest {
    pub knowledge_base_id: String,
    pub text: String,
    pub number_of_results: u32,
    pub filter: MetadataFilter,
}

impl RetrievalRequest {
    /// Build a request restricted to the tenant's partition.
    ///
    /// # Errors
    /// - `Error::InvalidRequest` if the query text is blank or `max_results` is 0
    pub fn tenant_scoped(
        knowledge_base_id: impl Into<String>,
        query: &RetrievalQuery,
        tenant: &TenantContext,
        filter_key: &str,
        limits: RetrievalLimits,
    ) -> Result<Self> {
        let text = query.text.trim();
        if text.is_empty() {
            return Err(Error::InvalidRequest("query text is empty".to_string()));
        }

        let number_of_results = match query.max_results {
            Some(0) => {
                return Err(Error::InvalidRequest(
                    "max_results must be a positive integer".to_string(),
                ));
            }
            Some(n) if n > limits.max_results => {
                warn!(
                    requested = n,
                    max = limits.max_results,
                    "Clamping retrieval result count"
                );
                limits.max_results
            }
            Some(n) => n,
            None => limits.default_results,
        };

        Ok(Self {
            knowledge_base_id: knowledge_base_id.into(),
            text: text.to_string(),
            number_of_results,
            filter: MetadataFilter::Equals {
                key: filter_key.to_string(),
                value: tenant.tenant_id().as_str().to_string(),
            },
        })
    }
}

/// One retrieved excerpt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Retrieval service abstraction
///
/// Implementations:
/// - `KnowledgeBaseClient`: managed knowledge base over HTTP
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Run a scoped retrieval.
    ///
    /// # Errors
    /// - `Error::Retrieval` when the service is unreachable or returns an error
    /// - `Error::RateLimitExceeded` when the service throttles the call
    async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<RetrievalResult>>;
}
