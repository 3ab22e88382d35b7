//! Anthropic Messages connector

use crate::{
    EgressError, Result, Service,
    client::{HttpClientConfig, create_client, with_retry},
    error_from_response,
};
use async_trait::async_trait;
use kbgate_core::model::{
    ChatMessage, ContentBlock, ModelProvider, ModelRequest, ModelResponse, Role, StopReason,
    ToolSpec, Usage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Default model when none is configured
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Anthropic connector configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication
    pub api_key: String,

    /// Base URL for Anthropic API (default: https://api.anthropic.com)
    pub base_url: String,

    /// Anthropic API version (default: 2023-06-01)
    pub api_version: String,

    /// Model used for every agent turn
    pub model: String,

    /// HTTP client configuration
    pub client_config: HttpClientConfig,
}

impl AnthropicConfig {
    /// Create a new Anthropic configuration
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            model: DEFAULT_MODEL.to_string(),
            client_config: HttpClientConfig::default(),
        }
    }

    /// Set the base URL (for custom endpoints)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the API version
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Anthropic connector
pub struct AnthropicConnector {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicConnector {
    /// Create a new Anthropic connector
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EgressError::ConfigError(
                "Anthropic API key must not be empty".to_string(),
            ));
        }
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    async fn send(&self, request: &AnthropicRequest) -> Result<AnthropicResponse> {
        debug!("┌─────────────────────────────────────────────────────────");
        debug!("│ Anthropic Request Headers");
        debug!("├─────────────────────────────────────────────────────────");
        debug!("│ x-api-key: <api_key>");
        debug!("│ anthropic-version: {}", self.config.api_version);
        debug!("│ Content-Type: application/json");
        debug!("└─────────────────────────────────────────────────────────");

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        with_retry(self.config.client_config.max_retries, || {
            let url = &url;
            async move {
                let response = self
                    .client
                    .post(url.as_str())
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", &self.config.api_version)
                    .header("Content-Type", "application/json")
                    .json(request)
                    .send()
                    .await?;

                debug!("┌─────────────────────────────────────────────────────────");
                debug!("│ Anthropic Response Headers");
                debug!("├─────────────────────────────────────────────────────────");
                debug!("│ Status: {}", response.status());
                for (name, value) in response.headers() {
                    if let Ok(val_str) = value.to_str() {
                        debug!("│ {}: {}", name, val_str);
                    }
                }
                debug!("└─────────────────────────────────────────────────────────");

                response.handle_anthropic_response().await
            }
        })
        .await
    }
}

#[async_trait]
impl ModelProvider for AnthropicConnector {
    #[instrument(skip(self, request), fields(model = %self.config.model, messages = request.messages.len()))]
    async fn complete(&self, request: ModelRequest) -> kbgate_core::Result<ModelResponse> {
        debug!("Sending non-streaming request to Anthropic");

        let anthropic_req = to_anthropic_request(&self.config.model, request);
        let response = self
            .send(&anthropic_req)
            .await
            .map_err(|e| e.into_core(Service::Model))?;

        Ok(from_anthropic_response(response))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Extension trait for handling Anthropic responses
trait AnthropicResponseExt {
    async fn handle_anthropic_response(self) -> Result<AnthropicResponse>;
}

impl AnthropicResponseExt for reqwest::Response {
    async fn handle_anthropic_response(self) -> Result<AnthropicResponse> {
        if !self.status().is_success() {
            return Err(error_from_response(self).await);
        }

        self.json::<AnthropicResponse>()
            .await
            .map_err(|e| EgressError::ParseError(format!("Failed to parse response: {}", e)))
    }
}

// Anthropic API types

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Thinking and other block types the agent does not consume
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

// Conversion functions

fn to_anthropic_block(block: ContentBlock) -> AnthropicContentBlock {
    match block {
        ContentBlock::Text { text } => AnthropicContentBlock::Text { text },
        ContentBlock::ToolUse { id, name, input } => {
            AnthropicContentBlock::ToolUse { id, name, input }
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error: is_error.then_some(true),
        },
    }
}

fn to_anthropic_message(message: ChatMessage) -> AnthropicMessage {
    AnthropicMessage {
        role: match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        content: message.content.into_iter().map(to_anthropic_block).collect(),
    }
}

fn to_anthropic_tool(tool: ToolSpec) -> AnthropicTool {
    AnthropicTool {
        name: tool.name,
        description: tool.description,
        input_schema: tool.input_schema,
    }
}

fn to_anthropic_request(model: &str, req: ModelRequest) -> AnthropicRequest {
    AnthropicRequest {
        model: model.to_string(),
        messages: req.messages.into_iter().map(to_anthropic_message).collect(),
        max_tokens: req.max_tokens,
        system: req.system,
        tools: req.tools.into_iter().map(to_anthropic_tool).collect(),
    }
}

fn from_anthropic_response(resp: AnthropicResponse) -> ModelResponse {
    let content = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(ContentBlock::Text { text }),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                Some(ContentBlock::ToolUse { id, name, input })
            }
            AnthropicContentBlock::ToolResult { .. } => {
                debug!("Unexpected tool_result in Anthropic response");
                None
            }
            AnthropicContentBlock::Unsupported => None,
        })
        .collect();

    ModelResponse {
        id: resp.id,
        model: resp.model,
        content,
        stop_reason: StopReason::from_wire(resp.stop_reason.as_deref()),
        usage: Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
    }
}
