//! End-to-end test fixtures for kbgate
//!
//! Starts mock knowledge base, memory and Anthropic services and builds the
//! real server application against them, so tests drive the full path from
//! `/invocations` down to the wire.

use axum::{Router, body::Body, http::Request, response::Response};
use kbgate_core::{RUNTIME_SESSION_HEADER, tenant::DEFAULT_TENANT_HEADER};
use kbgate_server::{ServerConfig, build_app};
use serde_json::{Value, json};
use wiremock::MockServer;

/// Knowledge base ID configured for every test app
pub const KB_ID: &str = "KB123";

/// Memory resource ID used when memory is enabled
pub const MEMORY_ID: &str = "mem-123";

/// Path the knowledge base connector posts to
pub fn retrieve_path() -> String {
    format!("/knowledgebases/{}/retrieve", KB_ID)
}

/// Mock downstream services
pub struct Services {
    pub knowledge_base: MockServer,
    pub memory: MockServer,
    pub model: MockServer,
}

impl Services {
    pub async fn start() -> Self {
        Self {
            knowledge_base: MockServer::start().await,
            memory: MockServer::start().await,
            model: MockServer::start().await,
        }
    }

    /// Configuration pointing every connector at the mocks
    pub fn config(&self, memory_enabled: bool) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.knowledge_base.id = KB_ID.to_string();
        config.knowledge_base.endpoint = Some(self.knowledge_base.uri());
        config.model.api_key = Some("test-key".to_string());
        config.model.base_url = Some(self.model.uri());
        config.model.model = "claude-test".to_string();
        if memory_enabled {
            config.memory.id = Some(MEMORY_ID.to_string());
            config.memory.endpoint = Some(self.memory.uri());
        }
        config
    }

    pub fn app(&self, memory_enabled: bool) -> Router {
        build_app(&self.config(memory_enabled)).expect("test app should build")
    }
}

/// Build a `POST` with a JSON body and optional trusted headers
pub fn post_json(uri: &str, tenant: Option<&str>, session: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(tenant) = tenant {
        builder = builder.header(DEFAULT_TENANT_HEADER, tenant);
    }
    if let Some(session) = session {
        builder = builder.header(RUNTIME_SESSION_HEADER, session);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

/// Messages API response carrying a single text block
pub fn anthropic_text(text: &str) -> Value {
    json!({
        "id": "msg_text",
        "type": "message",
        "role": "assistant",
        "model": "claude-test",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 50, "output_tokens": 12}
    })
}

/// Messages API response asking for a knowledge base search
pub fn anthropic_search(input: Value) -> Value {
    json!({
        "id": "msg_tool",
        "type": "message",
        "role": "assistant",
        "model": "claude-test",
        "content": [
            {"type": "text", "text": "Let me check the knowledge base."},
            {"type": "tool_use", "id": "toolu_01", "name": "knowledge_base_search", "input": input}
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 40, "output_tokens": 20}
    })
}

/// Retrieval API request body expected for `tenant_id`
pub fn retrieve_body(query: &str, results: u32, tenant_id: &str) -> Value {
    json!({
        "retrievalQuery": {"text": query},
        "retrievalConfiguration": {
            "vectorSearchConfiguration": {
                "numberOfResults": results,
                "filter": {"equals": {"key": "tenant_id", "value": tenant_id}}
            }
        }
    })
}

/// Retrieval API response with one S3-backed excerpt
pub fn retrieve_response(text: &str, score: f64, uri: &str) -> Value {
    json!({
        "retrievalResults": [{
            "content": {"text": text, "type": "TEXT"},
            "score": score,
            "location": {"type": "S3", "s3Location": {"uri": uri}}
        }]
    })
}
