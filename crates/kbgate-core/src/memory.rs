//! Conversation memory abstraction
//!
//! The memory service keeps a short event log per (actor, conversation). kbgate
//! stores each turn there and tags it with a marker event that records which
//! agent session the conversation maps to, so a later invocation can resume it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Prefix of the marker event that records an agent session ID
pub const SESSION_MARKER: &str = "__SESSION__:";

/// Role attached to a conversational memory event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryRole {
    User,
    Assistant,
    Tool,
    Other,
    /// Any role this crate does not know about
    #[serde(other)]
    Unknown,
}

/// One conversational message stored in an event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub text: String,
    pub role: MemoryRole,
}

impl MemoryMessage {
    pub fn new(text: impl Into<String>, role: MemoryRole) -> Self {
        Self {
            text: text.into(),
            role,
        }
    }
}

/// An event read back from the memory service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub event_id: Option<String>,
    pub messages: Vec<MemoryMessage>,
}

impl MemoryEvent {
    /// First session marker carried by this event, if any. Only `OTHER`
    /// messages count; user and assistant text is caller-controlled.
    pub fn session_marker(&self) -> Option<String> {
        self.messages
            .iter()
            .filter(|m| m.role == MemoryRole::Other)
            .find_map(|m| parse_session_marker(&m.text))
    }
}

/// Format the marker text for a session ID
pub fn session_marker(session_id: &str) -> String {
    format!("{}{}", SESSION_MARKER, session_id)
}

/// Extract the session ID from a marker text
pub fn parse_session_marker(text: &str) -> Option<String> {
    let id = text.strip_prefix(SESSION_MARKER)?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Memory service abstraction
///
/// Implementations:
/// - `MemoryClient`: managed memory service over HTTP
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// List the most recent events for an actor's conversation
    ///
    /// # Errors
    /// - `Error::Memory` for transport or service errors
    async fn list_events(
        &self,
        actor_id: &str,
        session_id: &str,
        max_results: u32,
    ) -> Result<Vec<MemoryEvent>>;

    /// Append one event holding the given messages
    ///
    /// # Errors
    /// - `Error::Memory` for transport or service errors
    async fn create_event(
        &self,
        actor_id: &str,
        session_id: &str,
        messages: Vec<MemoryMessage>,
    ) -> Result<()>;
}
