//! Agent tools
//!
//! [`KnowledgeBaseTool`] is the knowledge base search exposed to the model.
//! The model chooses the query text and the result count, nothing else: the
//! tenant filter is taken from the invocation's [`TenantContext`] and any
//! tenant-looking field in the tool input is ignored.

use async_trait::async_trait;
use kbgate_core::{
    Error, Result, TenantContext,
    model::ToolSpec,
    retrieval::{RetrievalLimits, RetrievalQuery, RetrievalRequest, RetrievalResult, Retriever},
};
use kbgate_observability::Metrics;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A tool the agent can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the tool input
    fn input_schema(&self) -> Value;

    /// Run the tool for the invocation's tenant.
    ///
    /// # Errors
    /// Any error is reported back to the model as a failed tool result.
    async fn execute(&self, tenant: &TenantContext, input: &Value) -> Result<Value>;

    /// Definition offered to the model
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Knowledge base search scoped to the invocation's tenant
pub struct KnowledgeBaseTool {
    retriever: Arc<dyn Retriever>,
    knowledge_base_id: String,
    filter_key: String,
    limits: RetrievalLimits,
    metrics: Option<Arc<Metrics>>,
}

impl KnowledgeBaseTool {
    pub const NAME: &'static str = "knowledge_base_search";

    pub fn new(
        retriever: Arc<dyn Retriever>,
        knowledge_base_id: impl Into<String>,
        filter_key: impl Into<String>,
        limits: RetrievalLimits,
    ) -> Self {
        Self {
            retriever,
            knowledge_base_id: knowledge_base_id.into(),
            filter_key: filter_key.into(),
            limits,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run a tenant-scoped retrieval.
    ///
    /// # Errors
    /// - `Error::InvalidRequest` for a blank query or a zero result count
    /// - `Error::Retrieval` / `Error::RateLimitExceeded` from the service
    pub async fn search(
        &self,
        tenant: &TenantContext,
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievalResult>> {
        let request = RetrievalRequest::tenant_scoped(
            self.knowledge_base_id.as_str(),
            query,
            tenant,
            &self.filter_key,
            self.limits,
        )?;

        info!(
            tenant = %tenant.tenant_id(),
            kb = %self.knowledge_base_id,
            results = request.number_of_results,
            "Knowledge base search"
        );

        let start = Instant::now();
        let outcome = self.retriever.retrieve(request).await;
        let elapsed = start.elapsed().as_secs_f64();

        if let Some(metrics) = &self.metrics {
            let label = match &outcome {
                Ok(_) => "success",
                Err(Error::RateLimitExceeded { .. }) => "throttled",
                Err(_) => "error",
            };
            metrics.record_retrieval(label, elapsed);
        }

        outcome.inspect_err(|e| error!(error = %e, "Knowledge base search failed"))
    }
}

/// Read the tool input into a query. Only `query` and `max_results` are read.
fn parse_input(input: &Value) -> Result<RetrievalQuery> {
    let query = input
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidRequest("missing required 'query' parameter".to_string()))?;

    if input.get("tenant_id").is_some() || input.get("tenant").is_some() {
        warn!("Ignoring tenant field in tool input");
    }

    let mut parsed = RetrievalQuery::new(query);
    match input.get("max_results") {
        None | Some(Value::Null) => {}
        Some(value) => {
            let n = value.as_u64().ok_or_else(|| {
                Error::InvalidRequest("'max_results' must be a positive integer".to_string())
            })?;
            parsed = parsed.with_max_results(u32::try_from(n).unwrap_or(u32::MAX));
        }
    }
    Ok(parsed)
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a natural-language query. \
         Returns a list of excerpts with a relevance score and the source document."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant passages"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": self.limits.max_results,
                    "description": format!(
                        "Maximum number of results to return (default {})",
                        self.limits.default_results
                    )
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, tenant: &TenantContext, input: &Value) -> Result<Value> {
        let query = parse_input(input)?;
        let results = self.search(tenant, &query).await?;
        Ok(serde_json::to_value(results)?)
    }
}
