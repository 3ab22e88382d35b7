//! kbgate Agent
//!
//! The agent answers a prompt by looping over model turns and executing the
//! tools the model asks for. Its only tool searches the knowledge base, always
//! inside the partition of the tenant the invocation runs for.

pub mod agent;
pub mod service;
pub mod tool;

pub use agent::{Agent, AgentConfig, AgentOutcome, AgentStop, DEFAULT_SYSTEM_PROMPT};
pub use service::{InvocationRequest, InvocationResponse, InvocationService};
pub use tool::{KnowledgeBaseTool, Tool};
