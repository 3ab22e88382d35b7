//! Invocation handling
//!
//! Turns one `/invocations` payload into an agent run: resolve the
//! conversation, resume its stored session when there is one, fall back to a
//! fresh session when the stored one is gone, and record the turn.

use kbgate_core::{Error, Result, TenantContext};
use kbgate_observability::Metrics;
use kbgate_session::ConversationMemory;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::agent::{Agent, AgentOutcome};

/// Conversation used when neither the payload nor the runtime names one
pub const DEFAULT_CONVERSATION_ID: &str = "default";

/// Invocation payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            conversation_id: None,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Invocation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub response: String,
    pub conversation_id: String,
    pub session_id: String,
}

/// Runs invocations against the agent with conversation memory
pub struct InvocationService {
    agent: Agent,
    memory: ConversationMemory,
    metrics: Option<Arc<Metrics>>,
}

impl InvocationService {
    pub fn new(agent: Agent, memory: ConversationMemory) -> Self {
        Self {
            agent,
            memory,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Pick the conversation: payload, then runtime session, then the default
    pub fn resolve_conversation_id(
        request: &InvocationRequest,
        runtime_session_id: Option<&str>,
    ) -> String {
        [request.conversation_id.as_deref(), runtime_session_id]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|id| !id.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_ID)
            .to_string()
    }

    /// Handle one invocation for `tenant`.
    ///
    /// # Errors
    /// - `Error::InvalidRequest("No prompt provided")` for a missing or blank prompt
    /// - model and session store errors from the agent run
    #[instrument(skip(self, tenant, request), fields(tenant = %tenant.tenant_id()))]
    pub async fn invoke(
        &self,
        tenant: &TenantContext,
        request: InvocationRequest,
        runtime_session_id: Option<&str>,
    ) -> Result<InvocationResponse> {
        let prompt = match request.prompt.as_deref() {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => return Err(Error::InvalidRequest("No prompt provided".to_string())),
        };

        let conversation_id = Self::resolve_conversation_id(&request, runtime_session_id);
        info!(conversation_id = %conversation_id, "Handling invocation");

        let stored_session = self.memory.find_session(tenant, &conversation_id).await;
        let outcome = self.run_with_fallback(tenant, &prompt, stored_session).await?;

        let response = outcome.responses.join("\n");

        self.memory
            .save_turn(
                tenant,
                &conversation_id,
                &outcome.session_id,
                &prompt,
                &response,
            )
            .await;

        Ok(InvocationResponse {
            response,
            conversation_id,
            session_id: outcome.session_id,
        })
    }

    async fn run_with_fallback(
        &self,
        tenant: &TenantContext,
        prompt: &str,
        stored_session: Option<String>,
    ) -> Result<AgentOutcome> {
        let Some(session_id) = stored_session else {
            info!("Starting new session");
            self.record_resume("fresh");
            return self.agent.run(tenant, prompt, None).await;
        };

        info!(session_id = %session_id, "Resuming session");
        match self.agent.run(tenant, prompt, Some(&session_id)).await {
            Ok(outcome) => {
                self.record_resume("resumed");
                Ok(outcome)
            }
            Err(Error::SessionNotFound(_)) => {
                info!(session_id = %session_id, "Session expired or not found, starting fresh");
                self.record_resume("expired");
                self.agent.run(tenant, prompt, None).await
            }
            Err(e) => Err(e),
        }
    }

    fn record_resume(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_session_resume(outcome);
        }
    }
}
