//! Conversation memory connector

use crate::{
    EgressError, Result, Service,
    client::{HttpClientConfig, create_client, with_retry, with_service_token},
    error_from_response,
};
use async_trait::async_trait;
use kbgate_core::memory::{MemoryEvent, MemoryMessage, MemoryRole, MemoryStore};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use urlencoding::encode;

/// Memory connector configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Base URL of the memory data-plane API
    pub base_url: String,

    /// Memory resource ID
    pub memory_id: String,

    /// Bearer token for the signing proxy or gateway in front of the service
    pub service_token: Option<String>,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl MemoryConfig {
    /// Configuration for the regional endpoint
    pub fn for_region(region: &str, memory_id: impl Into<String>) -> Self {
        Self {
            base_url: format!("https://bedrock-agentcore.{}.amazonaws.com", region),
            memory_id: memory_id.into(),
            service_token: None,
            client_config: HttpClientConfig::for_lookup_service(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }
}

/// Memory service connector
pub struct MemoryClient {
    config: MemoryConfig,
    client: Client,
}

impl MemoryClient {
    pub fn new(config: MemoryConfig) -> Result<Self> {
        if config.memory_id.trim().is_empty() {
            return Err(EgressError::ConfigError(
                "memory_id must not be empty".to_string(),
            ));
        }
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    pub fn memory_id(&self) -> &str {
        &self.config.memory_id
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn list_url(&self, actor_id: &str, session_id: &str) -> String {
        format!(
            "{}/memories/{}/actor/{}/sessions/{}",
            self.base(),
            encode(&self.config.memory_id),
            encode(actor_id),
            encode(session_id)
        )
    }

    fn create_url(&self) -> String {
        format!(
            "{}/memories/{}/events",
            self.base(),
            encode(&self.config.memory_id)
        )
    }

    async fn post_json<B: Serialize + Sync>(&self, url: &str, body: &B) -> Result<reqwest::Response> {
        with_retry(self.config.client_config.max_retries, || async move {
            let builder = self.client.post(url).json(body);
            let response = with_service_token(builder, self.config.service_token.as_deref())
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            Ok(response)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn send_list(&self, actor_id: &str, session_id: &str, max_results: u32) -> Result<Vec<MemoryEvent>> {
        let url = self.list_url(actor_id, session_id);
        let response = self
            .post_json(&url, &ListEventsBody { max_results })
            .await?;

        let parsed = response.json::<ListEventsResponse>().await.map_err(|e| {
            EgressError::ParseError(format!("Failed to parse list events response: {}", e))
        })?;

        debug!("Memory returned {} events", parsed.events.len());
        Ok(parsed.events.into_iter().map(from_wire_event).collect())
    }

    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    async fn send_create(
        &self,
        actor_id: &str,
        session_id: &str,
        messages: Vec<MemoryMessage>,
    ) -> Result<()> {
        let body = CreateEventBody {
            actor_id: actor_id.to_string(),
            session_id: session_id.to_string(),
            event_timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            payload: messages.into_iter().map(to_wire_payload).collect(),
        };

        self.post_json(&self.create_url(), &body).await?;
        debug!("Memory event created");
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for MemoryClient {
    async fn list_events(
        &self,
        actor_id: &str,
        session_id: &str,
        max_results: u32,
    ) -> kbgate_core::Result<Vec<MemoryEvent>> {
        self.send_list(actor_id, session_id, max_results)
            .await
            .map_err(|e| e.into_core(Service::Memory))
    }

    async fn create_event(
        &self,
        actor_id: &str,
        session_id: &str,
        messages: Vec<MemoryMessage>,
    ) -> kbgate_core::Result<()> {
        self.send_create(actor_id, session_id, messages)
            .await
            .map_err(|e| e.into_core(Service::Memory))
    }
}

// Memory API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEventsBody {
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct ListEventsResponse {
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    payload: Vec<WirePayload>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversational: Option<WireConversational>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireConversational {
    content: WireContent,
    role: MemoryRole,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateEventBody {
    actor_id: String,
    session_id: String,
    event_timestamp: f64,
    payload: Vec<WirePayload>,
}

fn to_wire_payload(message: MemoryMessage) -> WirePayload {
    WirePayload {
        conversational: Some(WireConversational {
            content: WireContent { text: message.text },
            role: message.role,
        }),
    }
}

// Non-conversational payload entries (blobs) are skipped
fn from_wire_event(event: WireEvent) -> MemoryEvent {
    MemoryEvent {
        event_id: event.event_id,
        messages: event
            .payload
            .into_iter()
            .filter_map(|p| p.conversational)
            .map(|c| MemoryMessage::new(c.content.text, c.role))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> MemoryClient {
        MemoryClient::new(
            MemoryConfig::for_region("us-west-2", "mem-123").with_base_url("http://localhost:9001"),
        )
        .unwrap()
    }

    #[test]
    fn test_config_for_region() {
        let config = MemoryConfig::for_region("eu-central-1", "mem-1");
        assert_eq!(
            config.base_url,
            "https://bedrock-agentcore.eu-central-1.amazonaws.com"
        );
        assert_eq!(config.memory_id, "mem-1");
    }

    #[test]
    fn test_empty_memory_id_rejected() {
        let result = MemoryClient::new(MemoryConfig::for_region("us-west-2", "  "));
        assert!(matches!(result, Err(EgressError::ConfigError(_))));
    }

    #[test]
    fn test_urls_encode_tenant_scoped_actor() {
        let client = client();
        assert_eq!(
            client.list_url("claude_agent/tenant-a", "conv 1"),
            "http://localhost:9001/memories/mem-123/actor/claude_agent%2Ftenant-a/sessions/conv%201"
        );
        assert_eq!(
            client.create_url(),
            "http://localhost:9001/memories/mem-123/events"
        );
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = to_wire_payload(MemoryMessage::new("__SESSION__:s1", MemoryRole::Other));
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({"conversational": {"content": {"text": "__SESSION__:s1"}, "role": "OTHER"}})
        );
    }

    #[test]
    fn test_mixed_roles_still_parse() {
        let response: ListEventsResponse = serde_json::from_value(json!({
            "events": [{
                "eventId": "evt-9",
                "payload": [
                    {"conversational": {"content": {"text": "lookup"}, "role": "TOOL"}},
                    {"conversational": {"content": {"text": "note"}, "role": "SYSTEM"}},
                    {"conversational": {"content": {"text": "__SESSION__:s9"}, "role": "OTHER"}}
                ]
            }]
        }))
        .unwrap();

        let event = from_wire_event(response.events.into_iter().next().unwrap());
        assert_eq!(event.messages[0].role, MemoryRole::Tool);
        assert_eq!(event.messages[1].role, MemoryRole::Unknown);
        assert_eq!(event.session_marker(), Some("s9".to_string()));
    }

    #[test]
    fn test_from_wire_event_skips_blobs() {
        let response: ListEventsResponse = serde_json::from_value(json!({
            "events": [{
                "eventId": "evt-1",
                "payload": [
                    {"conversational": {"content": {"text": "hi"}, "role": "USER"}},
                    {"blob": {"raw": true}},
                    {"conversational": {"content": {"text": "__SESSION__:s1"}, "role": "OTHER"}}
                ]
            }]
        }))
        .unwrap();

        let events: Vec<MemoryEvent> = response.events.into_iter().map(from_wire_event).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id.as_deref(), Some("evt-1"));
        assert_eq!(events[0].messages.len(), 2);
        assert_eq!(events[0].session_marker(), Some("s1".to_string()));
    }
}
