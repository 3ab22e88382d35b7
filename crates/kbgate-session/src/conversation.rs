//! Conversation to agent session mapping
//!
//! Every completed turn is written to the memory service as one event holding
//! the prompt, the response and a `__SESSION__:` marker. The next invocation of
//! the same conversation reads the marker back to resume the agent session.
//!
//! Memory is best effort. Lookup and save failures are logged and the
//! invocation carries on without them.

use kbgate_core::{
    memory::{MemoryMessage, MemoryRole, MemoryStore, session_marker},
    tenant::{TenantContext, TenantId},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Actor the runtime records events under
pub const DEFAULT_ACTOR_ID: &str = "claude_agent";

/// Events inspected when looking for a stored session
pub const MAX_LOOKUP_EVENTS: u32 = 10;

/// Maps conversations to resumable agent sessions through the memory service
#[derive(Clone)]
pub struct ConversationMemory {
    store: Option<Arc<dyn MemoryStore>>,
    actor_id: String,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store: Some(store),
            actor_id: DEFAULT_ACTOR_ID.to_string(),
        }
    }

    /// No memory service configured; every conversation starts fresh
    pub fn disabled() -> Self {
        Self {
            store: None,
            actor_id: DEFAULT_ACTOR_ID.to_string(),
        }
    }

    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Memory actor for a tenant. Conversations of different tenants never
    /// share an event log, even under the same conversation ID.
    pub fn actor_for(&self, tenant_id: &TenantId) -> String {
        format!("{}/{}", self.actor_id, tenant_id)
    }

    /// Find the agent session stored for a conversation, if any
    pub async fn find_session(
        &self,
        tenant: &TenantContext,
        conversation_id: &str,
    ) -> Option<String> {
        let store = self.store.as_ref()?;
        let actor_id = self.actor_for(tenant.tenant_id());

        let events = match store
            .list_events(&actor_id, conversation_id, MAX_LOOKUP_EVENTS)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to look up stored session"
                );
                return None;
            }
        };

        debug!(
            conversation_id = %conversation_id,
            events = events.len(),
            "Loaded conversation events"
        );

        let session_id = events.iter().find_map(|e| e.session_marker());
        if let Some(session_id) = &session_id {
            info!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                "Found stored session"
            );
        }
        session_id
    }

    /// Record a completed turn and the session it ran in
    pub async fn save_turn(
        &self,
        tenant: &TenantContext,
        conversation_id: &str,
        session_id: &str,
        prompt: &str,
        response: &str,
    ) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if session_id.is_empty() {
            return;
        }

        let actor_id = self.actor_for(tenant.tenant_id());
        let messages = vec![
            MemoryMessage::new(prompt, MemoryRole::User),
            MemoryMessage::new(response, MemoryRole::Assistant),
            MemoryMessage::new(session_marker(session_id), MemoryRole::Other),
        ];

        match store
            .create_event(&actor_id, conversation_id, messages)
            .await
        {
            Ok(()) => info!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                "Saved session for conversation"
            ),
            Err(e) => warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to save session"
            ),
        }
    }
}
