//! Agent transcript store trait
//!
//! The `SessionStore` holds the message history of agent sessions so a later
//! invocation can resume one. Stores are tenant-aware: a session is only
//! visible to the tenant that created it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, model::ChatMessage, tenant::TenantId};

/// Message history of one agent session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Session store trait
///
/// Implementations:
/// - `InMemorySessionStore`: process-local store with idle expiry
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session's transcript
    ///
    /// # Errors
    /// - `Error::SessionNotFound` if the session doesn't exist, has expired,
    ///   or belongs to a different tenant
    /// - `Error::SessionStore` for read errors
    async fn load(&self, tenant_id: &TenantId, session_id: &str) -> Result<Transcript>;

    /// Save (create or replace) a session's transcript
    ///
    /// # Errors
    /// - `Error::SessionStore` for write errors
    async fn save(&self, tenant_id: &TenantId, session_id: &str, transcript: Transcript)
    -> Result<()>;

    /// Number of live sessions
    async fn len(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_len() {
        let mut transcript = Transcript::new();
        assert!(transcript.is_empty());
        transcript.messages.push(ChatMessage::user_text("hi"));
        assert_eq!(transcript.len(), 1);
    }
}
