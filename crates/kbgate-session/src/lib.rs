//! kbgate Session Management
//!
//! This crate keeps agent sessions resumable across invocations:
//! - In-process transcript store with idle expiry and LRU eviction
//! - Conversation to session mapping in the managed memory service

pub mod conversation;
pub mod store;

pub use conversation::{ConversationMemory, DEFAULT_ACTOR_ID, MAX_LOOKUP_EVENTS};
pub use store::InMemorySessionStore;
