//! Operator endpoints: `/healthz` (liveness), `/readyz` (downstream services)
//! and `/metrics` (Prometheus text format).
//!
//! The runtime contract's `/ping` lives in the ingress router.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::TextEncoder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics::Metrics;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub version: String,
}

/// State of one downstream dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Ready,
    /// Optional service that was not configured
    Disabled,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// `knowledge_base`, `memory` or `model`
    pub name: String,
    pub status: ServiceState,
}

impl ServiceStatus {
    pub fn new(name: impl Into<String>, status: ServiceState) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// `ready` or `not_ready`
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<Vec<String>>,
}

/// Reports which downstream services the runtime can use.
pub trait ReadinessChecker: Send + Sync {
    fn service_statuses(&self) -> Vec<ServiceStatus>;

    /// Ready unless some service is unavailable. Disabled services don't count.
    fn is_ready(&self) -> bool {
        self.service_statuses()
            .iter()
            .all(|s| s.status != ServiceState::Unavailable)
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub metrics: Arc<Metrics>,
    pub readiness_checker: Option<Arc<dyn ReadinessChecker>>,
}

impl HealthState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            readiness_checker: None,
        }
    }

    pub fn with_readiness_checker(
        metrics: Arc<Metrics>,
        readiness_checker: Arc<dyn ReadinessChecker>,
    ) -> Self {
        Self {
            metrics,
            readiness_checker: Some(readiness_checker),
        }
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_text))
        .with_state(state)
}

async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn readiness(State(state): State<HealthState>) -> Response {
    let (ready, services) = match &state.readiness_checker {
        Some(checker) => (checker.is_ready(), checker.service_statuses()),
        None => (true, Vec::new()),
    };

    if ready {
        let body = ReadinessResponse {
            status: "ready".to_string(),
            services,
            unavailable: None,
        };
        return (StatusCode::OK, Json(body)).into_response();
    }

    let unavailable = services
        .iter()
        .filter(|s| s.status == ServiceState::Unavailable)
        .map(|s| s.name.clone())
        .collect();
    let body = ReadinessResponse {
        status: "not_ready".to_string(),
        services,
        unavailable: Some(unavailable),
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

async fn prometheus_text(State(state): State<HealthState>) -> Response {
    let families = state.metrics.registry().gather();
    match TextEncoder::new().encode_to_string(&families) {
        Ok(text) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], text).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {}", e),
        )
            .into_response(),
    }
}
