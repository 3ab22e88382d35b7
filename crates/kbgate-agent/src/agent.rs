//! Agent tool loop
//!
//! One run appends the user prompt to the session transcript and then loops:
//! call the model, keep its text, execute the tools it asked for and feed the
//! results back, until the model stops asking for tools or the turn limit is
//! reached. The transcript is saved under the session ID afterwards so a later
//! invocation can resume it.

use kbgate_core::{
    Result, TenantContext,
    model::{ChatMessage, ContentBlock, ModelProvider, ModelRequest, Role, StopReason},
    session_store::{SessionStore, Transcript},
};
use kbgate_observability::Metrics;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::tool::Tool;

/// System prompt used unless the configuration overrides it
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using the organization's knowledge base.

Use the knowledge_base_search tool to look up facts before answering. Search again with a \
rephrased query when the first results are not relevant. Base your answer on the retrieved \
passages and mention the source documents you relied on. If the knowledge base does not \
contain the answer, say so instead of guessing.

Keep responses concise and actionable.";

/// Agent loop configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Model calls allowed per run
    pub max_turns: u32,
    /// Output token limit per model call
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_turns: 10,
            max_tokens: 4096,
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStop {
    /// The model finished on its own
    Completed(StopReason),
    /// The model still wanted tools when the turn limit was reached
    TurnLimit,
}

/// Result of one agent run
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    /// Text blocks produced by the model, in order
    pub responses: Vec<String>,
    pub session_id: String,
    /// Model calls made
    pub turns: u32,
    pub stop: AgentStop,
}

/// Tool-using agent over a model provider
pub struct Agent {
    model: Arc<dyn ModelProvider>,
    tools: Vec<Arc<dyn Tool>>,
    sessions: Arc<dyn SessionStore>,
    config: AgentConfig,
    metrics: Option<Arc<Metrics>>,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        sessions: Arc<dyn SessionStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            tools: Vec::new(),
            sessions,
            config,
            metrics: None,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer `prompt` for `tenant`, optionally resuming a stored session.
    ///
    /// # Errors
    /// - `Error::SessionNotFound` if `resume` names a session this tenant
    ///   cannot load
    /// - model errors, which end the run without saving it
    #[instrument(skip(self, tenant, prompt), fields(tenant = %tenant.tenant_id(), resume = resume.unwrap_or("")))]
    pub async fn run(
        &self,
        tenant: &TenantContext,
        prompt: &str,
        resume: Option<&str>,
    ) -> Result<AgentOutcome> {
        let (session_id, mut transcript) = match resume {
            Some(session_id) => {
                let transcript = self.sessions.load(tenant.tenant_id(), session_id).await?;
                info!(messages = transcript.len(), "Resuming session {}", session_id);
                (session_id.to_string(), transcript)
            }
            None => {
                let session_id = Uuid::new_v4().to_string();
                info!("Starting new session {}", session_id);
                (session_id, Transcript::new())
            }
        };

        push_user_prompt(&mut transcript, prompt);

        let tool_specs: Vec<_> = self.tools.iter().map(|t| t.spec()).collect();
        let mut responses = Vec::new();
        let mut turns = 0;
        let mut stop = AgentStop::TurnLimit;

        while turns < self.config.max_turns {
            turns += 1;
            debug!(turn = turns, "Calling model");

            let request = ModelRequest {
                system: Some(self.config.system_prompt.clone()),
                messages: transcript.messages.clone(),
                tools: tool_specs.clone(),
                max_tokens: self.config.max_tokens,
            };

            let response = match self.model.complete(request).await {
                Ok(response) => {
                    self.record_model_call("success");
                    response
                }
                Err(e) => {
                    self.record_model_call("error");
                    return Err(e);
                }
            };

            debug!(
                turn = turns,
                stop_reason = ?response.stop_reason,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Model turn finished"
            );

            responses.extend(
                response
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } if !text.is_empty() => Some(text.clone()),
                        _ => None,
                    }),
            );

            let tool_results = self.execute_tools(tenant, &response.content).await;

            transcript.messages.push(ChatMessage {
                role: Role::Assistant,
                content: response.content,
            });

            if tool_results.is_empty() {
                stop = AgentStop::Completed(response.stop_reason);
                break;
            }

            transcript.messages.push(ChatMessage {
                role: Role::User,
                content: tool_results,
            });
        }

        if stop == AgentStop::TurnLimit {
            warn!(
                max_turns = self.config.max_turns,
                "Agent stopped at the turn limit"
            );
        }

        self.sessions
            .save(tenant.tenant_id(), &session_id, transcript)
            .await?;

        Ok(AgentOutcome {
            responses,
            session_id,
            turns,
            stop,
        })
    }

    /// Execute every `tool_use` block, in order. Failures become error results.
    async fn execute_tools(
        &self,
        tenant: &TenantContext,
        content: &[ContentBlock],
    ) -> Vec<ContentBlock> {
        let mut results = Vec::new();

        for block in content {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };

            info!(tool = %name, tool_use_id = %id, "Executing tool");

            let outcome = match self.tools.iter().find(|t| t.name() == name) {
                Some(tool) => tool.execute(tenant, input).await,
                None => Err(kbgate_core::Error::InvalidRequest(format!(
                    "Unknown tool '{}'",
                    name
                ))),
            };

            let (content, is_error) = match outcome {
                Ok(value) => {
                    self.record_tool_call(name, "success");
                    (value.to_string(), false)
                }
                Err(e) => {
                    warn!(tool = %name, error = %e, "Tool call failed");
                    self.record_tool_call(name, "error");
                    (e.to_string(), true)
                }
            };

            results.push(ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content,
                is_error,
            });
        }

        results
    }

    fn record_model_call(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_model_call(outcome);
        }
    }

    fn record_tool_call(&self, tool: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_tool_call(tool, outcome);
        }
    }
}

/// Append the prompt as a user turn. A transcript that already ends on a user
/// turn (tool results from a run cut off at the turn limit) gets the prompt
/// added to that turn so roles keep alternating.
fn push_user_prompt(transcript: &mut Transcript, prompt: &str) {
    if let Some(last) = transcript.messages.last_mut()
        && last.role == Role::User
    {
        last.content.push(ContentBlock::text(prompt));
        return;
    }
    transcript.messages.push(ChatMessage::user_text(prompt));
}
