//! Agent runtime endpoints
//!
//! The runtime contract: `POST /invocations` and `GET /ping`, plus a
//! `POST /retrieve` operator surface that runs the same tenant-scoped search
//! the agent's tool does.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use kbgate_agent::{InvocationRequest, InvocationResponse, InvocationService, KnowledgeBaseTool};
use kbgate_core::{
    Error, TenantContext, TenantResolver,
    retrieval::{RetrievalQuery, RetrievalResult},
};
use kbgate_observability::Metrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::middleware::RequestMetadataExt;
use crate::types::{IngressError, IngressResult, RequestMetadata};

/// Runtime health as reported by `/ping`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PingStatus {
    Healthy,
    HealthyBusy,
}

/// `/ping` response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: PingStatus,
    /// Unix seconds of the last status change
    pub time_of_last_update: i64,
}

/// Tracks in-flight work for the `/ping` busy signal
#[derive(Debug)]
pub struct PingState {
    in_flight: AtomicUsize,
    last_update: AtomicI64,
}

impl PingState {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            last_update: AtomicI64::new(chrono::Utc::now().timestamp()),
        }
    }

    /// Mark one unit of work in flight until the guard is dropped
    pub fn begin(&self) -> InFlightGuard<'_> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            self.touch();
        }
        InFlightGuard { ping: self }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PingResponse {
        let status = if self.in_flight() > 0 {
            PingStatus::HealthyBusy
        } else {
            PingStatus::Healthy
        };
        PingResponse {
            status,
            time_of_last_update: self.last_update.load(Ordering::SeqCst),
        }
    }

    fn touch(&self) {
        self.last_update
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
    }
}

impl Default for PingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop
pub struct InFlightGuard<'a> {
    ping: &'a PingState,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.ping.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.ping.touch();
        }
    }
}

/// Shared state of the runtime router
pub struct RuntimeState {
    invocations: Arc<InvocationService>,
    knowledge_base: Arc<KnowledgeBaseTool>,
    resolver: TenantResolver,
    ping: PingState,
    metrics: Option<Arc<Metrics>>,
}

impl RuntimeState {
    pub fn new(
        invocations: Arc<InvocationService>,
        knowledge_base: Arc<KnowledgeBaseTool>,
        resolver: TenantResolver,
    ) -> Self {
        Self {
            invocations,
            knowledge_base,
            resolver,
            ping: PingState::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ping(&self) -> &PingState {
        &self.ping
    }

    /// Resolve the caller's tenant, counting rejections
    fn resolve_tenant(&self, headers: &HeaderMap) -> IngressResult<TenantContext> {
        self.resolver.resolve(headers).map_err(|e| {
            let reason = match &e {
                Error::TenantRequired(_) => "missing",
                Error::InvalidTenant(_) => "invalid",
                _ => "error",
            };
            warn!(reason, error = %e, "Rejecting request without a trusted tenant");
            if let Some(metrics) = &self.metrics {
                metrics.record_tenant_rejection(reason);
            }
            IngressError::from(e)
        })
    }
}

/// `/retrieve` request body
#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<u32>,
}

/// `/retrieve` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub results: Vec<RetrievalResult>,
}

/// Create the runtime router
pub fn router(state: Arc<RuntimeState>) -> Router {
    Router::new()
        .route("/invocations", post(invocations))
        .route("/retrieve", post(retrieve))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn ping(State(state): State<Arc<RuntimeState>>) -> Json<PingResponse> {
    Json(state.ping.status())
}

async fn invocations(
    State(state): State<Arc<RuntimeState>>,
    metadata: Option<Extension<RequestMetadataExt>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let _guard = state.ping.begin();

    let metadata = metadata
        .map(|Extension(RequestMetadataExt(m))| m)
        .unwrap_or_else(|| RequestMetadata::from_headers(&headers));

    let response = match handle_invocation(&state, &headers, &metadata, &body).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            warn!(request_id = %metadata.request_id, status = e.status().as_u16(), error = %e, "Invocation failed");
            e.into_response()
        }
    };

    let elapsed = start.elapsed().as_secs_f64();
    if let Some(metrics) = &state.metrics {
        metrics.record_invocation(response.status().as_u16(), elapsed);
    }
    info!(
        request_id = %metadata.request_id,
        status = response.status().as_u16(),
        elapsed_ms = (elapsed * 1000.0) as u64,
        client_ip = %metadata.client_ip.as_deref().unwrap_or("-"),
        user_agent = %metadata.user_agent.as_deref().unwrap_or("-"),
        "Invocation finished"
    );

    response
}

async fn handle_invocation(
    state: &RuntimeState,
    headers: &HeaderMap,
    metadata: &RequestMetadata,
    body: &[u8],
) -> IngressResult<InvocationResponse> {
    let tenant = state.resolve_tenant(headers)?;

    let payload = parse_payload(body)?;
    let request: InvocationRequest = serde_json::from_value(payload)
        .map_err(|e| IngressError::InvalidRequest(format!("Invalid payload: {}", e)))?;

    debug!(
        request_id = %metadata.request_id,
        tenant = %tenant.tenant_id(),
        origin = tenant.origin(),
        "Dispatching invocation"
    );

    Ok(state
        .invocations
        .invoke(&tenant, request, metadata.runtime_session_id.as_deref())
        .await?)
}

async fn retrieve(
    State(state): State<Arc<RuntimeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RetrieveResponse>, IngressError> {
    let _guard = state.ping.begin();

    let tenant = state.resolve_tenant(&headers)?;

    let payload = parse_payload(&body)?;
    let request: RetrieveRequest = serde_json::from_value(payload)
        .map_err(|e| IngressError::InvalidRequest(format!("Invalid payload: {}", e)))?;

    let mut query = RetrievalQuery::new(request.query);
    if let Some(n) = request.max_results {
        query = query.with_max_results(n);
    }

    let results = state.knowledge_base.search(&tenant, &query).await?;
    Ok(Json(RetrieveResponse { results }))
}

/// Parse the body into a non-empty JSON object.
///
/// Tenant fields in the payload are never trusted; they are logged and left
/// for serde to drop.
fn parse_payload(body: &[u8]) -> IngressResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngressError::InvalidRequest("No payload provided".to_string()));
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| IngressError::InvalidRequest(format!("Invalid JSON payload: {}", e)))?;

    let Value::Object(fields) = &payload else {
        return Err(IngressError::InvalidRequest(
            "Payload must be a JSON object".to_string(),
        ));
    };
    if fields.is_empty() {
        return Err(IngressError::InvalidRequest("No payload provided".to_string()));
    }
    if fields.contains_key("tenant_id") || fields.contains_key("tenant") {
        warn!("Ignoring tenant field in request payload");
    }

    Ok(payload)
}
