//! Application bootstrap
//!
//! Builds the connectors, the agent and the HTTP application from a validated
//! [`ServerConfig`].

use anyhow::Context;
use axum::Router;
use kbgate_agent::{Agent, AgentConfig, InvocationService, KnowledgeBaseTool};
use kbgate_core::{TenantResolver, TenantSource};
use kbgate_egress::{
    anthropic::{AnthropicConfig, AnthropicConnector},
    knowledge_base::{KnowledgeBaseClient, KnowledgeBaseConfig},
    memory::{MemoryClient, MemoryConfig},
};
use kbgate_ingress::{RuntimeState, middleware, router};
use kbgate_observability::{
    HealthState, Metrics, ReadinessChecker, ServiceState, ServiceStatus, health_router,
};
use kbgate_session::{ConversationMemory, InMemorySessionStore};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;

/// Readiness from configuration only: which downstream services were set up at
/// startup. Reachability is not checked, so nothing here reports `unavailable`.
pub struct ConfiguredServices {
    statuses: Vec<ServiceStatus>,
}

impl ConfiguredServices {
    fn new(memory_enabled: bool) -> Self {
        let memory = if memory_enabled {
            ServiceState::Ready
        } else {
            ServiceState::Disabled
        };
        Self {
            statuses: vec![
                ServiceStatus::new("knowledge_base", ServiceState::Ready),
                ServiceStatus::new("model", ServiceState::Ready),
                ServiceStatus::new("memory", memory),
            ],
        }
    }
}

impl ReadinessChecker for ConfiguredServices {
    fn service_statuses(&self) -> Vec<ServiceStatus> {
        self.statuses.clone()
    }
}

/// Build the full application: runtime routes, health routes and middleware.
///
/// # Errors
/// Fails if the configuration is invalid or a connector cannot be created.
pub fn build_app(config: &ServerConfig) -> anyhow::Result<Router> {
    config.validate()?;

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let resolver = TenantResolver::new(config.tenant.clone())?;
    match resolver.source() {
        TenantSource::Header { name } => info!("🔒 Tenant resolved from trusted header '{}'", name),
        TenantSource::Static { tenant_id } => info!("🔒 Tenant pinned to '{}'", tenant_id),
    }

    // Knowledge base
    let mut kb_config = KnowledgeBaseConfig::for_region(&config.region);
    if let Some(endpoint) = &config.knowledge_base.endpoint {
        kb_config = kb_config.with_base_url(endpoint);
    }
    if let Some(token) = &config.service_token {
        kb_config = kb_config.with_service_token(token);
    }
    info!("📚 Knowledge base {} via {}", config.knowledge_base.id, kb_config.base_url);
    let retriever = Arc::new(
        KnowledgeBaseClient::new(kb_config).context("Failed to create knowledge base client")?,
    );
    let kb_tool = Arc::new(
        KnowledgeBaseTool::new(
            retriever,
            config.knowledge_base.id.as_str(),
            config.knowledge_base.filter_key.as_str(),
            config.knowledge_base.limits(),
        )
        .with_metrics(metrics.clone()),
    );

    // Model
    let api_key = config.model.api_key.clone().unwrap_or_default();
    let mut model_config = AnthropicConfig::new(api_key).with_model(&config.model.model);
    if let Some(base_url) = &config.model.base_url {
        model_config = model_config.with_base_url(base_url);
    }
    info!("🤖 Model {} via {}", model_config.model, model_config.base_url);
    let model = Arc::new(
        AnthropicConnector::new(model_config).context("Failed to create Anthropic connector")?,
    );

    // Agent
    let mut agent_config = AgentConfig {
        max_turns: config.model.max_turns,
        max_tokens: config.model.max_tokens,
        ..AgentConfig::default()
    };
    if let Some(system_prompt) = &config.model.system_prompt {
        agent_config.system_prompt = system_prompt.clone();
    }
    let sessions = Arc::new(InMemorySessionStore::with_limits(
        Duration::from_secs(config.sessions.ttl_secs),
        config.sessions.capacity,
    ));
    let agent = Agent::new(model, sessions, agent_config)
        .with_tool(kb_tool.clone())
        .with_metrics(metrics.clone());

    // Conversation memory
    let memory = match &config.memory.id {
        Some(memory_id) => {
            let mut memory_config = MemoryConfig::for_region(&config.region, memory_id.as_str());
            if let Some(endpoint) = &config.memory.endpoint {
                memory_config = memory_config.with_base_url(endpoint);
            }
            if let Some(token) = &config.service_token {
                memory_config = memory_config.with_service_token(token);
            }
            info!("🧠 Conversation memory {} enabled", memory_id);
            let client =
                MemoryClient::new(memory_config).context("Failed to create memory client")?;
            ConversationMemory::new(Arc::new(client)).with_actor_id(&config.memory.actor_id)
        }
        None => {
            info!("🧠 Conversation memory disabled (no memory id configured)");
            ConversationMemory::disabled()
        }
    };
    let readiness = Arc::new(ConfiguredServices::new(memory.is_enabled()));

    let service = InvocationService::new(agent, memory).with_metrics(metrics.clone());
    let state = Arc::new(
        RuntimeState::new(Arc::new(service), kb_tool, resolver).with_metrics(metrics.clone()),
    );

    let app = router(state).merge(health_router(HealthState::with_readiness_checker(
        metrics, readiness,
    )));

    Ok(middleware::apply(app, config.max_body_bytes).layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.knowledge_base.id = "KB123".to_string();
        config.knowledge_base.endpoint = Some("http://127.0.0.1:9".to_string());
        config.model.api_key = Some("sk-ant-test".to_string());
        config.model.base_url = Some("http://127.0.0.1:9".to_string());
        config
    }

    #[test]
    fn test_build_app_rejects_invalid_config() {
        let mut config = config();
        config.model.api_key = None;
        assert!(build_app(&config).is_err());
    }

    #[tokio::test]
    async fn test_readyz_reports_services() {
        let app = build_app(&config()).unwrap();

        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(
            json["services"],
            serde_json::json!([
                {"name": "knowledge_base", "status": "ready"},
                {"name": "model", "status": "ready"},
                {"name": "memory", "status": "disabled"}
            ])
        );
    }

    #[test]
    fn test_readiness_is_configuration_only() {
        // Endpoints point at a closed port; readiness still follows configuration
        let enabled = ConfiguredServices::new(true);
        assert!(enabled.is_ready());
        assert!(
            enabled
                .service_statuses()
                .iter()
                .all(|s| s.status == ServiceState::Ready)
        );

        let without_memory = ConfiguredServices::new(false);
        assert!(without_memory.is_ready());
        assert_eq!(
            without_memory.service_statuses()[2],
            ServiceStatus::new("memory", ServiceState::Disabled)
        );
    }

    #[tokio::test]
    async fn test_ping_and_security_headers() {
        let app = build_app(&config()).unwrap();

        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-request-id").is_some());
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn test_missing_tenant_rejected_before_downstream() {
        // Endpoints point at a closed port; a forwarded call would surface as 502
        let app = build_app(&config()).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/invocations")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"hi","tenant_id":"tenant-b"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
